use chrono::{DateTime, Utc};
use dau_gateway_protocol::{
    message::{now_ms, Envelope, Hello},
    EnvelopeCodec,
};
use futures::SinkExt;
use serde::Serialize;
use std::{
    net::SocketAddr,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};
use tokio::{io::AsyncWrite, sync::Mutex};
use tokio_util::{codec::FramedWrite, sync::CancellationToken};
use tracing::{debug, warn};

pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One live device socket.
///
/// Writes go through a per-connection lock so concurrent senders never
/// interleave frames. `cancel` ends the receive loop; `drained` fires once the
/// loop has finished its cleanup.
pub struct DeviceConnection {
    pub(crate) id: u64,
    device_id: String,
    peer: SocketAddr,
    hello: Hello,
    connected_at: DateTime<Utc>,
    last_activity_ms: AtomicU64,
    connected: AtomicBool,
    writer: Mutex<FramedWrite<BoxedWriter, EnvelopeCodec>>,
    write_timeout: Duration,
    pub(crate) cancel: CancellationToken,
    pub(crate) drained: CancellationToken,
}

/// Serializable snapshot of a connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub device_id: String,
    pub connection_id: u64,
    pub peer: String,
    pub connected_at: DateTime<Utc>,
    pub last_activity_ms: u64,
    pub model: String,
    pub serial_number: String,
    pub firmware_version: String,
}

impl DeviceConnection {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u64,
        device_id: String,
        peer: SocketAddr,
        hello: Hello,
        writer: BoxedWriter,
        codec: EnvelopeCodec,
        write_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            device_id,
            peer,
            hello,
            connected_at: Utc::now(),
            last_activity_ms: AtomicU64::new(now_ms()),
            connected: AtomicBool::new(true),
            writer: Mutex::new(FramedWrite::new(writer, codec)),
            write_timeout,
            cancel,
            drained: CancellationToken::new(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.cancel.is_cancelled()
    }

    pub(crate) fn touch(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub(crate) fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    /// Writes one envelope. On I/O failure or write timeout the connection is
    /// cancelled so its receive loop tears it down.
    pub async fn send(&self, envelope: Envelope) -> bool {
        if !self.is_connected() {
            return false;
        }
        let sequence = envelope.sequence();
        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(self.write_timeout, writer.send(envelope)).await {
            Ok(Ok(())) => {
                debug!(device_id = %self.device_id, sequence, "envelope sent");
                true
            }
            Ok(Err(e)) => {
                warn!(device_id = %self.device_id, sequence, error = %e, "write failed, closing connection");
                self.cancel.cancel();
                false
            }
            Err(_) => {
                warn!(device_id = %self.device_id, sequence, timeout = ?self.write_timeout, "write timed out, closing connection");
                self.cancel.cancel();
                false
            }
        }
    }

    /// Flushes and shuts down the write half. Bounded by the write timeout.
    pub(crate) async fn close_writer(&self) {
        let mut writer = self.writer.lock().await;
        let _ = tokio::time::timeout(self.write_timeout, writer.close()).await;
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            device_id: self.device_id.clone(),
            connection_id: self.id,
            peer: self.peer.to_string(),
            connected_at: self.connected_at,
            last_activity_ms: self.last_activity_ms.load(Ordering::Relaxed),
            model: self.hello.model.clone(),
            serial_number: self.hello.serial_number.clone(),
            firmware_version: self.hello.firmware_version.clone(),
        }
    }
}
