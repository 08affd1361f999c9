//! In-memory device link for unit tests.
use async_trait::async_trait;
use dau_gateway_protocol::message::{Envelope, RequestKind, ResponseKind};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, Once},
};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    link::DeviceLink,
    registry::{DeviceMessage, MessageBus, MessageSubscription},
};

pub(crate) fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

pub(crate) type Outbox = mpsc::UnboundedReceiver<(String, Envelope)>;

pub(crate) struct MemoryLink {
    bus: MessageBus,
    connected: Mutex<HashSet<String>>,
    outbox: mpsc::UnboundedSender<(String, Envelope)>,
}

impl MemoryLink {
    pub(crate) fn new() -> (Arc<Self>, Outbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = Arc::new(Self {
            bus: MessageBus::new(),
            connected: Mutex::new(HashSet::new()),
            outbox: tx,
        });
        (link, rx)
    }

    pub(crate) fn connect(&self, device_id: &str) {
        self.connected.lock().unwrap().insert(device_id.to_string());
    }

    pub(crate) fn disconnect(&self, device_id: &str) {
        self.connected.lock().unwrap().remove(device_id);
    }

    /// Injects an envelope as if `device_id` had sent it.
    pub(crate) fn deliver(&self, device_id: &str, envelope: Envelope) {
        self.bus.publish(DeviceMessage {
            device_id: device_id.to_string(),
            connection_id: 0,
            envelope,
        });
    }

    pub(crate) fn respond(&self, device_id: &str, sequence: u32, kind: ResponseKind) {
        self.deliver(device_id, Envelope::response(device_id, sequence, kind));
    }
}

#[async_trait]
impl DeviceLink for MemoryLink {
    async fn send(&self, device_id: &str, envelope: Envelope) -> bool {
        if !self.connected.lock().unwrap().contains(device_id) {
            return false;
        }
        self.outbox.send((device_id.to_string(), envelope)).is_ok()
    }

    fn subscribe(&self) -> MessageSubscription {
        self.bus.subscribe()
    }
}

/// Simulated device: answers every request with whatever `responder` returns,
/// echoing the request sequence.
pub(crate) fn spawn_device<F>(link: Arc<MemoryLink>, mut outbox: Outbox, mut responder: F) -> JoinHandle<()>
where
    F: FnMut(&str, &RequestKind) -> Vec<ResponseKind> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some((device_id, envelope)) = outbox.recv().await {
            let Some(request) = envelope.request_kind() else {
                continue;
            };
            for kind in responder(&device_id, request) {
                link.respond(&device_id, envelope.sequence(), kind);
            }
        }
    })
}
