//! Multi-source downloader.
//!
//! Resolves sources, probes them, turns each successful probe into a worker,
//! and then repeatedly hands the best available worker the next free range
//! until the tracker runs dry. Workers write straight into the shared file
//! and report to the tracker, ranker, and dispatcher themselves; this module
//! only admits workers, assigns work, and drives the state machine.

mod budget;
mod connect;
mod dispatch;
mod finish;
mod progress;

pub use budget::ConnectionBudget;
pub use connect::plan_probes;
pub use progress::ProgressStats;

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::checksum::ExpectedDigest;
use crate::config::MsdConfig;
use crate::downloader::Downloader;
use crate::fetch::{FetchError, ProbeInfo, RangeFetcher};
use crate::launch::{Dispatcher, LaunchError};
use crate::naming::{derive_final_name, DEFAULT_FILENAME};
use crate::observer::{Listener, ListenerId, StateCell};
use crate::ranker::SourceRanker;
use crate::resolver::SourceResolver;
use crate::retry::RetryPolicy;
use crate::segmenter::{NextRange, RangeTracker};
use crate::state::DownloadState;
use crate::storage::{temp_path, StorageWriterBuilder};
use crate::worker::{RangeDownloader, WorkSession, WorkerEvents};
use connect::{check_probe, Decline};

/// Where the finished file goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A directory; the file name comes from resolution or the first source.
    Dir(PathBuf),
    /// An exact path.
    File(PathBuf),
}

#[derive(Default)]
struct RunState {
    session: Option<Arc<WorkSession>>,
    /// Size from resolution, if it knew one.
    resolved_size: Option<u64>,
    expected_digest: Option<ExpectedDigest>,
    final_name: Option<String>,
    /// Final name was fixed by resolution and must not follow Content-Disposition.
    name_fixed: bool,
    /// Probes planned; sizes the chunk split.
    planned: usize,
    probes_pending: usize,
    fatal: Option<String>,
    finished: bool,
    started_at: Option<Instant>,
}

struct Inner {
    me: Weak<Inner>,
    config: MsdConfig,
    resolver: Box<dyn SourceResolver>,
    fetcher: Arc<dyn RangeFetcher>,
    destination: Destination,
    state: StateCell<DownloadState>,
    started: AtomicBool,
    cancel: AtomicBool,
    paused: AtomicBool,
    remove_files: AtomicBool,
    next_worker_id: AtomicU64,
    ranker: Arc<SourceRanker<RangeDownloader>>,
    budget: ConnectionBudget,
    run: Mutex<RunState>,
    wake: Condvar,
}

/// Downloads one resource from many sources at once.
///
/// Cheap to clone; clones share the same download.
#[derive(Clone)]
pub struct MultiSourceDownloader {
    inner: Arc<Inner>,
}

impl MultiSourceDownloader {
    pub fn new(
        resolver: impl SourceResolver + 'static,
        fetcher: Arc<dyn RangeFetcher>,
        destination: Destination,
        config: MsdConfig,
    ) -> Self {
        let budget = ConnectionBudget::new(config.max_total_connections);
        let inner = Arc::new_cyclic(|me| Inner {
            me: me.clone(),
            config,
            resolver: Box::new(resolver),
            fetcher,
            destination,
            state: StateCell::new(DownloadState::Idle),
            started: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            remove_files: AtomicBool::new(false),
            next_worker_id: AtomicU64::new(1),
            ranker: Arc::new(SourceRanker::new()),
            budget,
            run: Mutex::new(RunState::default()),
            wake: Condvar::new(),
        });
        Self { inner }
    }

    /// Progress snapshot; zeros until the size is known.
    pub fn progress(&self) -> ProgressStats {
        self.inner.progress()
    }

    /// Block until the download reaches a terminal state or `timeout` passes.
    pub fn wait(&self, timeout: Duration) -> DownloadState {
        let deadline = Instant::now() + timeout;
        let mut run = self.inner.lock_run();
        while !run.finished && !self.inner.state.get().is_terminal() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            run = self
                .inner
                .wake
                .wait_timeout(run, (deadline - now).min(self.inner.config.wait_slice()))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        drop(run);
        self.inner.state.get()
    }
}

impl Inner {
    fn lock_run(&self) -> MutexGuard<'_, RunState> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn events(&self) -> Option<Arc<dyn WorkerEvents>> {
        self.me.upgrade().map(|a| a as Arc<dyn WorkerEvents>)
    }

    fn is_stopping(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn final_name(&self) -> String {
        if let Some(name) = self.lock_run().final_name.clone() {
            return name;
        }
        match &self.destination {
            Destination::File(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| DEFAULT_FILENAME.to_string()),
            Destination::Dir(_) => DEFAULT_FILENAME.to_string(),
        }
    }

    fn complete_file(&self) -> PathBuf {
        match &self.destination {
            Destination::File(p) => p.clone(),
            Destination::Dir(d) => d.join(self.final_name()),
        }
    }

    fn progress(&self) -> ProgressStats {
        let run = self.lock_run();
        let elapsed_secs = run.started_at.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0);
        let active_sources = self.ranker.live_count();
        match &run.session {
            Some(s) => ProgressStats {
                bytes_done: s.tracker.bytes_read(),
                total_bytes: Some(s.tracker.size()),
                elapsed_secs,
                ranges_done: s.tracker.completed_chunks(),
                range_count: s.tracker.num_chunks(),
                active_sources,
            },
            None => ProgressStats {
                bytes_done: 0,
                total_bytes: run.resolved_size,
                elapsed_secs,
                ranges_done: 0,
                range_count: 0,
                active_sources,
            },
        }
    }

    /// Wait for the session's dispatcher, or fail once the run has ended without one.
    fn wait_for_dispatcher(&self) -> Result<Arc<Dispatcher>, LaunchError> {
        let mut run = self.lock_run();
        loop {
            if let Some(s) = &run.session {
                return Ok(Arc::clone(&s.dispatcher));
            }
            if run.finished {
                return Err(LaunchError::Aborted(self.state.get().to_string()));
            }
            run = self
                .wake
                .wait_timeout(run, self.config.wait_slice())
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Decide whether a probed worker joins the download, creating the
    /// session on the first admission.
    fn admit(&self, run: &mut RunState, info: &ProbeInfo) -> Result<Arc<WorkSession>, Decline> {
        if run.finished || run.fatal.is_some() || self.is_stopping() {
            return Err(Decline::NotRunning);
        }
        if let Some(session) = &run.session {
            let chunks = session.tracker.num_chunks();
            check_probe(info, session.tracker.size(), chunks)?;
            if self.budget.in_use() >= chunks {
                return Err(Decline::AllChunksCovered);
            }
            if !self.budget.try_acquire(chunks) {
                return Err(Decline::ConnectionCeiling);
            }
            return Ok(Arc::clone(session));
        }

        let size = run
            .resolved_size
            .or(info.content_length)
            .ok_or(Decline::SizeUnknown)?;
        let sources = if info.accept_ranges {
            run.planned.min(self.budget.max_total()).max(1)
        } else {
            1
        };
        let tracker = RangeTracker::for_sources(size, sources);
        check_probe(info, size, tracker.num_chunks())?;

        if !run.name_fixed {
            if let (Some(cd), Some(first)) = (&info.content_disposition, &run.final_name) {
                let derived = derive_final_name("", Some(cd));
                if derived != DEFAULT_FILENAME && &derived != first {
                    debug!(name = %derived, "final name from Content-Disposition");
                    run.final_name = Some(derived);
                }
            }
        }
        let final_path = match &self.destination {
            Destination::File(p) => p.clone(),
            Destination::Dir(d) => d.join(run.final_name.as_deref().unwrap_or(DEFAULT_FILENAME)),
        };
        let part = temp_path(&final_path);
        let storage = StorageWriterBuilder::create(&part)
            .and_then(|mut b| {
                b.preallocate(size)?;
                Ok(b.build())
            })
            .map_err(|e| Decline::Storage(format!("{e:#}")))?;

        let dispatcher = Arc::new(Dispatcher::new(size, storage.clone(), self.config.wait_slice()));
        let retry = self
            .config
            .retry
            .as_ref()
            .map(RetryPolicy::from_config)
            .unwrap_or_default();
        info!(
            size,
            chunks = tracker.num_chunks(),
            chunk_size = tracker.chunk_size(),
            file = %part.display(),
            "download session created"
        );
        let session = Arc::new(WorkSession::new(tracker, Arc::clone(&self.ranker), dispatcher, storage, retry));
        self.budget.try_acquire(usize::MAX);
        run.session = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Give a newly admitted worker its first range straight away.
    fn bridge(&self, worker: Arc<RangeDownloader>, session: &Arc<WorkSession>, events: &Arc<dyn WorkerEvents>) {
        if self.is_stopping() || self.paused.load(Ordering::SeqCst) {
            session.ranker.on_available(worker);
            return;
        }
        match session.tracker.try_next_range() {
            NextRange::Assigned(range) => worker.download(range, session, events),
            NextRange::Pending | NextRange::Exhausted => session.ranker.on_available(worker),
        }
    }
}

impl WorkerEvents for Inner {
    fn on_connect(&self, worker: Arc<RangeDownloader>, info: ProbeInfo) {
        let admitted = {
            let mut run = self.lock_run();
            run.probes_pending = run.probes_pending.saturating_sub(1);
            let admitted = self.admit(&mut run, &info);
            if admitted.is_ok() {
                // Registered under the run lock so the loop never sees zero live workers and zero pending probes.
                self.ranker.register();
            }
            admitted
        };
        self.wake.notify_all();
        match admitted {
            Ok(session) => {
                info!(worker = worker.id(), source = %worker.source(), "source connected");
                if let Some(events) = self.events() {
                    self.bridge(worker, &session, &events);
                }
            }
            Err(Decline::Storage(e)) => self.on_fatal(format!("could not create download file: {e}")),
            Err(reason) => debug!(worker = worker.id(), source = %worker.source(), %reason, "declining source"),
        }
    }

    fn on_probe_failed(&self, worker: &RangeDownloader, error: &FetchError) {
        {
            let mut run = self.lock_run();
            run.probes_pending = run.probes_pending.saturating_sub(1);
        }
        info!(source = %worker.source(), %error, "source unreachable");
        self.wake.notify_all();
    }

    fn on_progress(&self) {
        self.wake.notify_all();
    }

    fn on_worker_lost(&self, worker: &RangeDownloader, error: &FetchError) {
        self.budget.release();
        warn!(worker = worker.id(), source = %worker.source(), %error, "source lost");
        self.wake.notify_all();
    }

    fn on_fatal(&self, reason: String) {
        error!(%reason, "download aborted");
        self.lock_run().fatal.get_or_insert(reason);
        self.wake.notify_all();
    }
}

impl Downloader for MultiSourceDownloader {
    type State = DownloadState;

    fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("msd-download".into())
            .spawn(move || inner.run());
        if let Err(e) = spawned {
            self.inner
                .finish(DownloadState::Aborted(format!("failed to spawn download thread: {e}")));
        }
    }

    fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        self.inner.wake.notify_all();
    }

    fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.wake.notify_all();
    }

    fn stop(&self, remove_files: bool) {
        if remove_files {
            self.inner.remove_files.store(true, Ordering::SeqCst);
        }
        self.inner.cancel.store(true, Ordering::SeqCst);
        self.inner.wake.notify_all();
        if !self.inner.started.swap(true, Ordering::SeqCst) {
            self.inner.finish(DownloadState::Canceled);
            return;
        }
        let finished = self.inner.lock_run().finished;
        if finished && remove_files && !self.inner.state.get().is_success() {
            self.inner.remove_incomplete();
        }
    }

    fn state(&self) -> DownloadState {
        self.inner.state.get()
    }

    fn add_listener(&self, listener: Listener<DownloadState>) -> ListenerId {
        self.inner.state.listeners().add(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.state.listeners().remove(id)
    }

    fn write(&self, out: &mut dyn Write, cancel_on_stream_close: bool) -> Result<u64, LaunchError> {
        let dispatcher = self.inner.wait_for_dispatcher()?;
        let result = dispatcher.write(out);
        if let Err(e) = &result {
            if e.is_consumer() && cancel_on_stream_close && dispatcher.active_writers() == 0 {
                info!("last stream consumer went away; canceling download");
                self.stop(false);
            }
        }
        result
    }

    fn incomplete_file(&self) -> PathBuf {
        temp_path(&self.inner.complete_file())
    }

    fn complete_file(&self) -> PathBuf {
        self.inner.complete_file()
    }

    fn size(&self) -> Option<u64> {
        let run = self.inner.lock_run();
        run.session
            .as_ref()
            .map(|s| s.tracker.size())
            .or(run.resolved_size)
    }

    fn final_name(&self) -> String {
        self.inner.final_name()
    }

    fn expected_digest(&self) -> Option<ExpectedDigest> {
        self.inner.lock_run().expected_digest.clone()
    }
}
