//! Ceiling on workers admitted to one download.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Connection slots. A probe success takes one slot when its worker is
/// admitted; a discarded worker gives it back.
#[derive(Debug)]
pub struct ConnectionBudget {
    max_total: usize,
    in_use: AtomicUsize,
}

impl ConnectionBudget {
    pub fn new(max_total: usize) -> Self {
        Self {
            max_total: max_total.max(1),
            in_use: AtomicUsize::new(0),
        }
    }

    pub fn max_total(&self) -> usize {
        self.max_total
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Take one slot if fewer than `limit` (and the ceiling) are in use.
    pub fn try_acquire(&self, limit: usize) -> bool {
        let cap = limit.min(self.max_total);
        let mut current = self.in_use.load(Ordering::Relaxed);
        loop {
            if current >= cap {
                return false;
            }
            match self.in_use.compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn release(&self) {
        let _ = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |n| n.checked_sub(1));
    }
}
