use async_trait::async_trait;
use dau_gateway_protocol::message::Envelope;

use crate::registry::MessageSubscription;

/// Send/receive capability the orchestrator and the forwarding pipeline need
/// from the transport.
#[async_trait]
pub trait DeviceLink: Send + Sync + 'static {
    /// Best-effort send to the device's current connection.
    /// `false` when the device is not connected or the write failed.
    async fn send(&self, device_id: &str, envelope: Envelope) -> bool;

    /// Subscribe to every envelope received from any device.
    fn subscribe(&self) -> MessageSubscription;
}
