use std::sync::atomic::{AtomicU32, Ordering};

/// Rolling u32 sequence numbers for one issuer.
///
/// Starts at 1, wraps at `u32::MAX` and never yields 0, which the catalog
/// reserves for "unset".
#[derive(Debug)]
pub struct SequenceGenerator {
    counter: AtomicU32,
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self::starting_after(0)
    }

    /// Generator whose first value is the one following `last`.
    pub fn starting_after(last: u32) -> Self {
        Self {
            counter: AtomicU32::new(last),
        }
    }

    pub fn next(&self) -> u32 {
        loop {
            let cur = self.counter.load(Ordering::Relaxed);
            let mut next = cur.wrapping_add(1);
            if next == 0 {
                next = 1;
            }
            if self
                .counter
                .compare_exchange(cur, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_one() {
        let seq = SequenceGenerator::new();
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
    }

    #[test]
    fn wraps_and_skips_zero() {
        let seq = SequenceGenerator::starting_after(u32::MAX - 1);
        assert_eq!(seq.next(), u32::MAX);
        assert_eq!(seq.next(), 1);
    }

    #[test]
    fn concurrent_callers_never_share_a_value() {
        let seq = std::sync::Arc::new(SequenceGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let seq = seq.clone();
                std::thread::spawn(move || (0..1000).map(|_| seq.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 4000);
    }
}
