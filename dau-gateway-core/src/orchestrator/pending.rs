use dashmap::{mapref::entry::Entry, DashMap};
use dau_gateway_protocol::{message::Envelope, SequenceGenerator};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::oneshot;

/// A caller waiting for the response to one sequence number.
pub(crate) struct PendingWaiter {
    waiter_id: u64,
    pub(crate) device_id: String,
    tx: oneshot::Sender<Envelope>,
}

/// Sequence number → waiter map. Inserts and removals are single atomic map
/// operations, so resolution happens at most once per registration.
#[derive(Default)]
pub(crate) struct PendingTable {
    waiters: DashMap<u32, PendingWaiter>,
    next_waiter_id: AtomicU64,
}

impl PendingTable {
    /// Allocates a sequence number that has no outstanding waiter and registers
    /// one for `device_id`.
    pub(crate) fn register(
        self: &Arc<Self>,
        sequences: &SequenceGenerator,
        device_id: &str,
    ) -> (PendingGuard, oneshot::Receiver<Envelope>) {
        let waiter_id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let mut waiter = Some(PendingWaiter {
            waiter_id,
            device_id: device_id.to_string(),
            tx,
        });
        loop {
            let sequence = sequences.next();
            if let Entry::Vacant(slot) = self.waiters.entry(sequence) {
                if let Some(waiter) = waiter.take() {
                    slot.insert(waiter);
                }
                let guard = PendingGuard {
                    table: Arc::clone(self),
                    sequence,
                    waiter_id,
                };
                return (guard, rx);
            }
        }
    }

    /// Hands `envelope` to the waiter registered for its sequence, provided the
    /// waiter belongs to `device_id`.
    pub(crate) fn resolve(&self, device_id: &str, envelope: Envelope) -> Resolution {
        let sequence = envelope.sequence();
        match self
            .waiters
            .remove_if(&sequence, |_, waiter| waiter.device_id == device_id)
        {
            Some((_, waiter)) => {
                if waiter.tx.send(envelope).is_ok() {
                    Resolution::Resolved
                } else {
                    Resolution::CallerGone
                }
            }
            None if self.waiters.contains_key(&sequence) => Resolution::WrongDevice,
            None => Resolution::NoWaiter,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn clear(&self) {
        self.waiters.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    Resolved,
    /// The caller stopped waiting between lookup and delivery
    CallerGone,
    WrongDevice,
    /// Late, duplicate or unsolicited
    NoWaiter,
}

/// Removes the caller's registration when the call finishes, whatever the outcome.
pub(crate) struct PendingGuard {
    table: Arc<PendingTable>,
    pub(crate) sequence: u32,
    waiter_id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let waiter_id = self.waiter_id;
        self.table
            .waiters
            .remove_if(&self.sequence, |_, waiter| waiter.waiter_id == waiter_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dau_gateway_protocol::message::{HeartbeatResponse, ResponseKind};

    fn response(sequence: u32) -> Envelope {
        Envelope::response("dau-1", sequence, ResponseKind::Heartbeat(HeartbeatResponse::default()))
    }

    #[test]
    fn resolves_exactly_once() {
        let table = Arc::new(PendingTable::default());
        let sequences = SequenceGenerator::new();
        let (guard, mut rx) = table.register(&sequences, "dau-1");

        assert_eq!(table.resolve("dau-1", response(guard.sequence)), Resolution::Resolved);
        assert_eq!(table.resolve("dau-1", response(guard.sequence)), Resolution::NoWaiter);
        assert_eq!(rx.try_recv().unwrap().sequence(), guard.sequence);
    }

    #[test]
    fn response_from_other_device_keeps_waiter() {
        let table = Arc::new(PendingTable::default());
        let sequences = SequenceGenerator::new();
        let (guard, _rx) = table.register(&sequences, "dau-1");

        assert_eq!(table.resolve("dau-2", response(guard.sequence)), Resolution::WrongDevice);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn skips_sequences_with_outstanding_waiters() {
        let table = Arc::new(PendingTable::default());
        let sequences = SequenceGenerator::starting_after(u32::MAX - 1);
        let (first, _rx1) = table.register(&sequences, "dau-1");
        assert_eq!(first.sequence, u32::MAX);

        // wrap back onto a sequence that is still pending
        let sequences = SequenceGenerator::starting_after(u32::MAX - 1);
        let (second, _rx2) = table.register(&sequences, "dau-1");
        assert_eq!(second.sequence, 1);
    }

    #[test]
    fn dropping_guard_removes_waiter() {
        let table = Arc::new(PendingTable::default());
        let sequences = SequenceGenerator::new();
        let (guard, _rx) = table.register(&sequences, "dau-1");
        assert_eq!(table.len(), 1);
        drop(guard);
        assert_eq!(table.len(), 0);
    }
}
