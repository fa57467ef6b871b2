//! Work queue of byte ranges: unassigned, in flight, done.

use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::range::{partition, ByteRange};
use super::size::select_size;

/// Length of one bounded wait inside the blocking [`RangeTracker::get_next_range`].
const WAIT_SLICE: Duration = Duration::from_millis(500);

/// A worker reported a range the tracker does not consider in flight.
///
/// This means two workers were handed the same bytes or a range was reported
/// twice; the download can no longer guarantee every byte is written once.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("range {0} is not assigned to any worker")]
    UnknownRange(ByteRange),
}

/// Outcome of a bounded request for work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextRange {
    /// The range now belongs to the caller.
    Assigned(ByteRange),
    /// Nothing unassigned right now, but ranges are still in flight and may fail back.
    Pending,
    /// Every range has been confirmed complete.
    Exhausted,
}

#[derive(Debug)]
struct TrackerState {
    inactive: BTreeSet<ByteRange>,
    active: BTreeSet<ByteRange>,
    bytes_read: u64,
}

/// Owns the partition of the file and hands ranges out to workers.
///
/// A range moves inactive -> active on assignment, active -> done on
/// [`on_range_complete`](Self::on_range_complete) and back to inactive on
/// [`on_range_failed`](Self::on_range_failed). Inactive ranges are handed out
/// lowest offset first so the front of the file fills in early for streaming.
#[derive(Debug)]
pub struct RangeTracker {
    state: Mutex<TrackerState>,
    changed: Condvar,
    size: u64,
    chunk_size: u64,
    num_chunks: usize,
}

impl RangeTracker {
    /// Partition `size` bytes into chunks of `chunk_size`.
    pub fn new(size: u64, chunk_size: u64) -> Self {
        let chunks = partition(size, chunk_size);
        let num_chunks = chunks.len();
        tracing::debug!(size, chunk_size, num_chunks, "range tracker created");
        Self {
            state: Mutex::new(TrackerState {
                inactive: chunks.into_iter().collect(),
                active: BTreeSet::new(),
                bytes_read: 0,
            }),
            changed: Condvar::new(),
            size,
            chunk_size,
            num_chunks,
        }
    }

    /// Partition using the chunk size picked by [`select_size`] for `num_sources`.
    pub fn for_sources(size: u64, num_sources: usize) -> Self {
        Self::new(size, select_size(size, num_sources))
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until a range can be assigned or everything is done.
    ///
    /// Returns `None` only when no range is unassigned or in flight, which is
    /// the signal for callers to stop asking.
    pub fn get_next_range(&self) -> Option<ByteRange> {
        loop {
            match self.poll_next_range(WAIT_SLICE) {
                NextRange::Assigned(range) => return Some(range),
                NextRange::Exhausted => return None,
                NextRange::Pending => {
                    tracing::trace!("no free range yet; waiting for an active range to settle");
                }
            }
        }
    }

    /// Like [`get_next_range`](Self::get_next_range) but gives up after `timeout`.
    pub fn poll_next_range(&self, timeout: Duration) -> NextRange {
        let deadline = Instant::now() + timeout;
        let mut st = self.lock();
        loop {
            if let Some(range) = st.inactive.pop_first() {
                st.active.insert(range);
                return NextRange::Assigned(range);
            }
            if st.active.is_empty() {
                return NextRange::Exhausted;
            }
            let now = Instant::now();
            if now >= deadline {
                return NextRange::Pending;
            }
            st = self
                .changed
                .wait_timeout(st, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Non-blocking variant used when a freshly connected worker wants its first range.
    pub fn try_next_range(&self) -> NextRange {
        self.poll_next_range(Duration::ZERO)
    }

    /// False once every range has been confirmed complete.
    pub fn has_more_ranges(&self) -> bool {
        let st = self.lock();
        !(st.inactive.is_empty() && st.active.is_empty())
    }

    /// Confirms `range` as downloaded. The range must currently be active.
    pub fn on_range_complete(&self, range: ByteRange) -> Result<(), TrackerError> {
        let mut st = self.lock();
        if !st.active.remove(&range) {
            tracing::error!(%range, "completion reported for a range that is not active");
            return Err(TrackerError::UnknownRange(range));
        }
        st.bytes_read += range.len();
        drop(st);
        self.changed.notify_all();
        Ok(())
    }

    /// Returns `range` to the unassigned set. The range must currently be active.
    pub fn on_range_failed(&self, range: ByteRange) -> Result<(), TrackerError> {
        let mut st = self.lock();
        if !st.active.remove(&range) {
            tracing::error!(%range, "failure reported for a range that is not active");
            return Err(TrackerError::UnknownRange(range));
        }
        st.inactive.insert(range);
        drop(st);
        tracing::debug!(%range, "range returned to the queue");
        self.changed.notify_all();
        Ok(())
    }

    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes confirmed complete so far.
    pub fn bytes_read(&self) -> u64 {
        self.lock().bytes_read
    }

    /// Number of ranges confirmed complete so far.
    pub fn completed_chunks(&self) -> usize {
        let st = self.lock();
        self.num_chunks - st.inactive.len() - st.active.len()
    }

    /// Snapshot of the unassigned ranges, lowest offset first.
    pub fn inactive_ranges(&self) -> Vec<ByteRange> {
        self.lock().inactive.iter().copied().collect()
    }

    /// Snapshot of the ranges currently owned by workers.
    pub fn active_ranges(&self) -> Vec<ByteRange> {
        self.lock().active.iter().copied().collect()
    }
}
