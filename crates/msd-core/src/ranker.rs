//! Priority queue of idle workers, fastest first.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

/// What the ranker needs to know about a worker.
pub trait Ranked {
    /// Stable identity, used to break ties.
    fn id(&self) -> u64;
    /// Measured throughput, `None` until the worker has completed a range.
    fn throughput_bps(&self) -> Option<u64>;
}

/// Sort key snapshotted when a worker becomes available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RankKey {
    bytes_per_sec: Option<u64>,
    id: u64,
}

impl Ord for RankKey {
    /// Higher known throughput first; unknown after every known value; then lower id.
    fn cmp(&self, other: &Self) -> Ordering {
        let by_speed = match (self.bytes_per_sec, other.bytes_per_sec) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_speed.then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct RankerState<W> {
    available: BTreeMap<RankKey, Arc<W>>,
    /// Registered workers not yet discarded, available or busy.
    live: usize,
}

/// Supplies the best available worker to the dispatch loop.
///
/// Ranking is best effort: throughput is read when a worker is re-inserted,
/// so a worker's position reflects its last completed range.
pub struct SourceRanker<W> {
    state: Mutex<RankerState<W>>,
    changed: Condvar,
}

impl<W: Ranked> Default for SourceRanker<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Ranked> SourceRanker<W> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RankerState {
                available: BTreeMap::new(),
                live: 0,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RankerState<W>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count a newly connected worker as live. It enters the queue through `on_available`.
    pub fn register(&self) {
        self.lock().live += 1;
        self.changed.notify_all();
    }

    /// Re-insert a worker that is ready for another range.
    pub fn on_available(&self, worker: Arc<W>) {
        let key = RankKey {
            bytes_per_sec: worker.throughput_bps(),
            id: worker.id(),
        };
        trace!(worker = key.id, bps = ?key.bytes_per_sec, "worker available");
        self.lock().available.insert(key, worker);
        self.changed.notify_all();
    }

    /// A live worker was discarded for good.
    pub fn on_failed(&self) {
        let mut st = self.lock();
        st.live = st.live.saturating_sub(1);
        drop(st);
        self.changed.notify_all();
    }

    pub fn has_more_sources(&self) -> bool {
        self.lock().live > 0
    }

    pub fn live_count(&self) -> usize {
        self.lock().live
    }

    pub fn available_count(&self) -> usize {
        self.lock().available.len()
    }

    /// Remove and return the best available worker, waiting up to `timeout`
    /// for one. `None` on timeout or when no live worker remains.
    pub fn poll_best_source(&self, timeout: Duration) -> Option<Arc<W>> {
        let deadline = Instant::now() + timeout;
        let mut st = self.lock();
        loop {
            if let Some((_, worker)) = st.available.pop_first() {
                return Some(worker);
            }
            if st.live == 0 {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            st = self
                .changed
                .wait_timeout(st, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Block until a worker is available. `None` once every worker has been discarded.
    pub fn get_best_source(&self) -> Option<Arc<W>> {
        loop {
            if let Some(w) = self.poll_best_source(Duration::from_millis(500)) {
                return Some(w);
            }
            if !self.has_more_sources() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake {
        id: u64,
        bps: Option<u64>,
    }

    impl Ranked for Fake {
        fn id(&self) -> u64 {
            self.id
        }
        fn throughput_bps(&self) -> Option<u64> {
            self.bps
        }
    }

    fn fake(id: u64, bps: Option<u64>) -> Arc<Fake> {
        Arc::new(Fake { id, bps })
    }

    #[test]
    fn fastest_first_unknown_last_ties_by_id() {
        let r = SourceRanker::new();
        for _ in 0..5 {
            r.register();
        }
        r.on_available(fake(4, None));
        r.on_available(fake(1, Some(100)));
        r.on_available(fake(3, None));
        r.on_available(fake(2, Some(5_000)));
        r.on_available(fake(5, Some(100)));

        let order: Vec<u64> = std::iter::from_fn(|| r.poll_best_source(Duration::ZERO))
            .map(|w| w.id)
            .collect();
        assert_eq!(order, vec![2, 1, 5, 3, 4]);
    }

    #[test]
    fn no_live_workers_returns_none() {
        let r: SourceRanker<Fake> = SourceRanker::new();
        assert!(!r.has_more_sources());
        assert!(r.get_best_source().is_none());

        r.register();
        assert!(r.poll_best_source(Duration::from_millis(20)).is_none());
        r.on_failed();
        assert!(r.get_best_source().is_none());
    }

    #[test]
    fn blocked_caller_wakes_on_available() {
        let r: Arc<SourceRanker<Fake>> = Arc::new(SourceRanker::new());
        r.register();
        let r2 = Arc::clone(&r);
        let waiter = std::thread::spawn(move || r2.get_best_source().map(|w| w.id));
        std::thread::sleep(Duration::from_millis(30));
        r.on_available(fake(7, None));
        assert_eq!(waiter.join().unwrap(), Some(7));
        assert_eq!(r.available_count(), 0);
        assert_eq!(r.live_count(), 1);
    }

    #[test]
    fn blocked_caller_released_when_last_worker_fails() {
        let r: Arc<SourceRanker<Fake>> = Arc::new(SourceRanker::new());
        r.register();
        let r2 = Arc::clone(&r);
        let waiter = std::thread::spawn(move || r2.get_best_source().is_none());
        std::thread::sleep(Duration::from_millis(30));
        r.on_failed();
        assert!(waiter.join().unwrap());
    }
}
