use dau_gateway_protocol::message::Envelope;
use dashmap::DashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::mpsc;

/// A decoded envelope attributed to the connection it arrived on.
#[derive(Debug, Clone)]
pub struct DeviceMessage {
    /// Identity the connection registered under
    pub device_id: String,
    pub connection_id: u64,
    pub envelope: Envelope,
}

type Subscribers = DashMap<u64, mpsc::UnboundedSender<Arc<DeviceMessage>>>;

/// In-process fan-out of inbound device messages.
///
/// Every subscriber owns an unbounded queue, so publishing never waits on a
/// subscriber and a slow one only grows its own backlog.
#[derive(Default)]
pub struct MessageBus {
    subscribers: Arc<Subscribers>,
    next_id: AtomicU64,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> MessageSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(id, tx);
        MessageSubscription {
            id,
            rx,
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    /// Delivers `message` to every live subscriber; returns how many received it.
    pub fn publish(&self, message: DeviceMessage) -> usize {
        let message = Arc::new(message);
        let mut delivered = 0;
        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            if entry.value().send(Arc::clone(&message)).is_ok() {
                delivered += 1;
            } else {
                closed.push(*entry.key());
            }
        }
        for id in closed {
            self.subscribers.remove(&id);
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Receiving side of a bus subscription; unsubscribes on drop.
pub struct MessageSubscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Arc<DeviceMessage>>,
    subscribers: Arc<Subscribers>,
}

impl MessageSubscription {
    pub async fn recv(&mut self) -> Option<Arc<DeviceMessage>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<DeviceMessage>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for MessageSubscription {
    fn drop(&mut self) {
        self.subscribers.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dau_gateway_protocol::message::{HeartbeatRequest, RequestKind};

    fn message(seq: u32) -> DeviceMessage {
        DeviceMessage {
            device_id: "dau-1".into(),
            connection_id: 1,
            envelope: Envelope::request("dau-1", seq, RequestKind::Heartbeat(HeartbeatRequest {})),
        }
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_message_in_order() {
        let bus = MessageBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        for seq in 1..=3 {
            assert_eq!(bus.publish(message(seq)), 2);
        }
        for sub in [&mut a, &mut b] {
            for seq in 1..=3 {
                assert_eq!(sub.recv().await.unwrap().envelope.sequence(), seq);
            }
        }
    }

    #[tokio::test]
    async fn idle_subscriber_does_not_block_publishing() {
        let bus = MessageBus::new();
        let _idle = bus.subscribe();
        let mut active = bus.subscribe();
        for seq in 1..=10_000 {
            bus.publish(message(seq));
        }
        assert_eq!(active.recv().await.unwrap().envelope.sequence(), 1);
    }

    #[test]
    fn dropping_a_subscription_unsubscribes() {
        let bus = MessageBus::new();
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(message(1)), 0);
    }
}
