//! One connection to one source, reused across many ranges.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::fetch::{FetchError, ProbeInfo, RangeFetcher, Source};
use crate::launch::Dispatcher;
use crate::ranker::{Ranked, SourceRanker};
use crate::retry::{classify, ErrorKind, RetryDecision, RetryPolicy};
use crate::segmenter::{ByteRange, RangeTracker};
use crate::storage::StorageWriter;

/// Shortest elapsed time credited to a range, so throughput stays finite.
const MIN_ELAPSED: Duration = Duration::from_micros(1);

/// Shared state of one running download, handed to every range a worker fetches.
pub struct WorkSession {
    pub tracker: RangeTracker,
    pub ranker: Arc<SourceRanker<RangeDownloader>>,
    pub dispatcher: Arc<Dispatcher>,
    pub retry: RetryPolicy,
    storage: Mutex<Option<StorageWriter>>,
}

impl WorkSession {
    pub fn new(
        tracker: RangeTracker,
        ranker: Arc<SourceRanker<RangeDownloader>>,
        dispatcher: Arc<Dispatcher>,
        storage: StorageWriter,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            tracker,
            ranker,
            dispatcher,
            retry,
            storage: Mutex::new(Some(storage)),
        }
    }

    /// Handle for writing a range, or `None` once the file has been closed.
    pub fn storage(&self) -> Option<StorageWriter> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Take the session's handle so the file can be closed and renamed.
    /// Later `storage()` calls return `None`.
    pub(crate) fn take_storage(&self) -> Option<StorageWriter> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Callbacks from worker threads to the download that owns them.
pub trait WorkerEvents: Send + Sync {
    /// Probe succeeded; the download decides whether to admit the worker.
    fn on_connect(&self, worker: Arc<RangeDownloader>, info: ProbeInfo);
    /// Probe failed; the source is dropped without retry.
    fn on_probe_failed(&self, worker: &RangeDownloader, error: &FetchError);
    /// A range completed and was recorded.
    fn on_progress(&self);
    /// A worker was discarded after a failure the retry policy gave up on.
    fn on_worker_lost(&self, worker: &RangeDownloader, error: &FetchError);
    /// An unrecoverable condition; the download must abort.
    fn on_fatal(&self, reason: String);
}

/// Per-worker measurements.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerStats {
    pub assigned: Option<ByteRange>,
    pub last_range_bytes: u64,
    pub last_elapsed: Option<Duration>,
    pub total_bytes: u64,
    pub ranges_completed: u64,
    pub consecutive_failures: u32,
    pub fetch_started: Option<Instant>,
    pub fetch_finished: Option<Instant>,
}

/// A worker bound to one source.
pub struct RangeDownloader {
    id: u64,
    source: Source,
    fetcher: Arc<dyn RangeFetcher>,
    stats: Mutex<WorkerStats>,
}

impl std::fmt::Debug for RangeDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeDownloader")
            .field("id", &self.id)
            .field("source", &self.source.uri)
            .finish()
    }
}

impl RangeDownloader {
    pub fn new(id: u64, source: Source, fetcher: Arc<dyn RangeFetcher>) -> Self {
        Self {
            id,
            source,
            fetcher,
            stats: Mutex::new(WorkerStats::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkerStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn stats(&self) -> WorkerStats {
        *self.lock()
    }

    /// Range currently being fetched, if any.
    pub fn assigned(&self) -> Option<ByteRange> {
        self.lock().assigned
    }

    /// Throughput of the last completed range in KiB/s; `None` before the first.
    pub fn get_kbs(&self) -> Option<f64> {
        let st = self.lock();
        let elapsed = st.last_elapsed?;
        Some(st.last_range_bytes as f64 / elapsed.as_secs_f64() / 1024.0)
    }

    /// Probe the source on a new thread and report through `events`.
    pub fn issue_head_request(self: &Arc<Self>, events: &Arc<dyn WorkerEvents>) -> io::Result<()> {
        let worker = Arc::clone(self);
        let events = Arc::clone(events);
        thread::Builder::new()
            .name(format!("msd-probe-{}", self.id))
            .spawn(move || match worker.fetcher.probe(&worker.source) {
                Ok(info) => {
                    debug!(worker = worker.id, source = %worker.source, ?info, "probe ok");
                    events.on_connect(worker, info);
                }
                Err(e) => {
                    debug!(worker = worker.id, source = %worker.source, error = %e, "probe failed");
                    events.on_probe_failed(&worker, &e);
                }
            })?;
        Ok(())
    }

    /// Fetch `range` on a new thread, writing each byte at its absolute offset.
    ///
    /// On success the range is reported to the dispatcher, then the tracker,
    /// and the worker goes back to the ranker. On failure the range returns to
    /// the tracker and the retry policy decides whether the worker survives.
    pub fn download(self: &Arc<Self>, range: ByteRange, session: &Arc<WorkSession>, events: &Arc<dyn WorkerEvents>) {
        {
            let mut st = self.lock();
            st.assigned = Some(range);
            st.fetch_started = Some(Instant::now());
            st.fetch_finished = None;
        }
        let worker = Arc::clone(self);
        let s = Arc::clone(session);
        let e = Arc::clone(events);
        let spawned = thread::Builder::new()
            .name(format!("msd-worker-{}", self.id))
            .spawn(move || worker.run_range(range, &s, e.as_ref()));
        if let Err(err) = spawned {
            error!(worker = self.id, %range, error = %err, "failed to spawn worker thread");
            self.lock().assigned = None;
            if let Err(te) = session.tracker.on_range_failed(range) {
                events.on_fatal(te.to_string());
            }
            session.ranker.on_failed();
            events.on_fatal(format!("failed to spawn worker thread: {err}"));
        }
    }

    fn run_range(self: Arc<Self>, range: ByteRange, session: &WorkSession, events: &dyn WorkerEvents) {
        let Some(storage) = session.storage() else {
            let closed = io::Error::new(io::ErrorKind::Other, "download file is closed");
            return self.on_failure(range, FetchError::Storage(closed), session, events);
        };
        let started = Instant::now();
        let mut written = 0u64;
        let fetched = {
            let mut sink = |data: &[u8]| -> io::Result<()> {
                storage.write_at(range.min + written, data)?;
                written += data.len() as u64;
                Ok(())
            };
            self.fetcher.fetch(&self.source, range, &mut sink)
        };
        let elapsed = started.elapsed().max(MIN_ELAPSED);
        let result = fetched.and_then(|n| {
            if n == range.len() && written == n {
                Ok(n)
            } else {
                Err(FetchError::Truncated {
                    expected: range.len(),
                    received: written,
                })
            }
        });

        match result {
            Ok(bytes) => self.on_success(range, bytes, started, elapsed, session, events),
            Err(e) => self.on_failure(range, e, session, events),
        }
    }

    fn on_success(
        self: Arc<Self>,
        range: ByteRange,
        bytes: u64,
        started: Instant,
        elapsed: Duration,
        session: &WorkSession,
        events: &dyn WorkerEvents,
    ) {
        {
            let mut st = self.lock();
            st.assigned = None;
            st.last_range_bytes = bytes;
            st.last_elapsed = Some(elapsed);
            st.total_bytes += bytes;
            st.ranges_completed += 1;
            st.consecutive_failures = 0;
            st.fetch_started = Some(started);
            st.fetch_finished = Some(started + elapsed);
        }
        debug!(worker = self.id, %range, ?elapsed, "range complete");

        session.dispatcher.on_range_complete(range);
        if let Err(e) = session.tracker.on_range_complete(range) {
            session.ranker.on_failed();
            events.on_fatal(e.to_string());
            return;
        }
        events.on_progress();
        session.ranker.on_available(self);
    }

    fn on_failure(self: Arc<Self>, range: ByteRange, error: FetchError, session: &WorkSession, events: &dyn WorkerEvents) {
        let attempt = {
            let mut st = self.lock();
            st.assigned = None;
            st.fetch_finished = Some(Instant::now());
            st.consecutive_failures += 1;
            st.consecutive_failures
        };
        if let Err(e) = session.tracker.on_range_failed(range) {
            session.ranker.on_failed();
            events.on_fatal(e.to_string());
            return;
        }

        let kind = classify(&error);
        if kind == ErrorKind::Storage {
            session.ranker.on_failed();
            events.on_fatal(format!("storage failure writing {range}: {error}"));
            return;
        }
        match session.retry.decide(attempt, kind) {
            RetryDecision::RetryAfter(delay) => {
                debug!(worker = self.id, %range, error = %error, attempt, ?delay, "range failed, backing off");
                thread::sleep(delay);
                session.ranker.on_available(self);
            }
            RetryDecision::NoRetry => {
                warn!(worker = self.id, source = %self.source, %range, error = %error, attempt, "discarding source");
                session.ranker.on_failed();
                events.on_worker_lost(&self, &error);
            }
        }
    }
}

impl Ranked for RangeDownloader {
    fn id(&self) -> u64 {
        self.id
    }

    fn throughput_bps(&self) -> Option<u64> {
        let st = self.lock();
        let elapsed = st.last_elapsed?;
        Some((st.last_range_bytes as f64 / elapsed.as_secs_f64()) as u64)
    }
}
