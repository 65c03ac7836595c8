use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Admits at most one recognition attempt at a time. Callers that find the
/// gate taken are turned away immediately instead of queueing.
#[derive(Debug, Clone, Default)]
pub struct AttemptGate {
    busy: Arc<AtomicBool>,
}

/// Ownership of the attempt slot. Dropping the permit releases the gate.
#[derive(Debug)]
#[must_use = "dropping the permit releases the gate immediately"]
pub struct AttemptPermit {
    busy: Arc<AtomicBool>,
    released: bool,
}

impl AttemptGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<AttemptPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| AttemptPermit {
                busy: Arc::clone(&self.busy),
                released: false,
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl AttemptPermit {
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let was_busy = self.busy.swap(false, Ordering::AcqRel);
        debug_assert!(was_busy, "attempt gate released while not held");
    }
}

impl Drop for AttemptPermit {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn second_acquire_fails_until_release() {
        let gate = AttemptGate::new();
        let permit = gate.try_acquire().expect("gate should be free");
        assert!(gate.is_busy());
        assert!(gate.try_acquire().is_none());

        permit.release();
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn dropping_permit_releases() {
        let gate = AttemptGate::new();
        {
            let _permit = gate.try_acquire().unwrap();
            assert!(gate.is_busy());
        }
        assert!(!gate.is_busy());
    }

    #[test]
    fn concurrent_acquire_admits_exactly_one() {
        const CALLERS: usize = 16;
        let gate = AttemptGate::new();
        let barrier = Arc::new(Barrier::new(CALLERS));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let gate = gate.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    // Keep the permit alive until every thread has tried.
                    gate.try_acquire().map(std::mem::forget).is_some()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(gate.is_busy());
    }

    #[test]
    fn after_release_exactly_one_more_caller_wins() {
        let gate = AttemptGate::new();
        gate.try_acquire().unwrap().release();

        let first = gate.try_acquire();
        let second = gate.try_acquire();
        assert!(first.is_some());
        assert!(second.is_none());
    }
}
