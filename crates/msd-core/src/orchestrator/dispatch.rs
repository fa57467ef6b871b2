//! The download thread: resolve, probe, then assign ranges until done.

use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::connect::plan_probes;
use super::{Destination, Inner};
use crate::naming::{derive_final_name, DEFAULT_FILENAME};
use crate::segmenter::NextRange;
use crate::state::DownloadState;
use crate::worker::{RangeDownloader, WorkSession, WorkerEvents};

impl Inner {
    pub(super) fn run(self: Arc<Self>) {
        self.lock_run().started_at = Some(Instant::now());
        self.state.set(DownloadState::GettingSources);

        let resolved = match self.resolver.resolve() {
            Ok(r) if !r.sources.is_empty() => r,
            Ok(_) => {
                info!("resolution returned no sources");
                return self.finish(DownloadState::CouldNotDetermineSources);
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "source resolution failed");
                return self.finish(DownloadState::CouldNotDetermineSources);
            }
        };
        if self.is_stopping() {
            return self.finish(DownloadState::Canceled);
        }

        let plan = plan_probes(&resolved.sources, &self.config);
        info!(
            sources = resolved.sources.len(),
            probes = plan.len(),
            size = ?resolved.size,
            "sources resolved"
        );
        {
            let mut run = self.lock_run();
            run.resolved_size = resolved.size;
            run.expected_digest = resolved.expected_digest.clone();
            run.name_fixed = resolved.final_name.is_some() || matches!(self.destination, Destination::File(_));
            run.final_name = Some(match &self.destination {
                Destination::File(p) => p
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| DEFAULT_FILENAME.to_string()),
                Destination::Dir(_) => resolved
                    .final_name
                    .clone()
                    .unwrap_or_else(|| derive_final_name(&resolved.sources[0].uri, None)),
            });
            run.planned = plan.len();
            run.probes_pending = plan.len();
        }

        let Some(events) = self.events() else {
            return;
        };
        for source in plan {
            let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
            let worker = Arc::new(RangeDownloader::new(id, source, Arc::clone(&self.fetcher)));
            if let Err(e) = worker.issue_head_request(&events) {
                warn!(worker = id, error = %e, "could not start probe");
                let mut run = self.lock_run();
                run.probes_pending = run.probes_pending.saturating_sub(1);
            }
        }

        let outcome = self.dispatch_loop(&events);
        self.finish(outcome);
    }

    fn wait_wake(&self, slice: Duration) {
        let run = self.lock_run();
        let _ = self.wake.wait_timeout(run, slice).unwrap_or_else(PoisonError::into_inner);
    }

    fn publish_progress(&self, session: &WorkSession) {
        let elapsed = self
            .lock_run()
            .started_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let kbs = if elapsed > 0.0 {
            (session.tracker.bytes_read() as f64 / elapsed / 1024.0) as u64
        } else {
            0
        };
        self.state.set(DownloadState::Downloading {
            kbs,
            sources: self.ranker.live_count(),
        });
    }

    /// Assign ranges to the best workers until the tracker is exhausted.
    /// Returns the terminal state to finish with.
    fn dispatch_loop(&self, events: &Arc<dyn WorkerEvents>) -> DownloadState {
        let slice = self.config.wait_slice();
        let mut last_publish: Option<Instant> = None;
        let mut last_sources = usize::MAX;

        loop {
            let (session, probes_pending) = {
                let run = self.lock_run();
                if let Some(reason) = &run.fatal {
                    return DownloadState::Aborted(reason.clone());
                }
                (run.session.clone(), run.probes_pending)
            };
            if self.is_stopping() {
                return DownloadState::Canceled;
            }
            if self.paused.load(Ordering::SeqCst) {
                self.state.set(DownloadState::Paused);
                last_publish = None;
                self.wait_wake(slice);
                continue;
            }

            let Some(session) = session else {
                if probes_pending == 0 {
                    return DownloadState::NoSourcesAvailable;
                }
                self.wait_wake(slice);
                continue;
            };
            if !session.tracker.has_more_ranges() {
                return DownloadState::Complete;
            }
            if !self.ranker.has_more_sources() {
                if probes_pending == 0 {
                    return DownloadState::NoSourcesAvailable;
                }
                self.wait_wake(slice);
                continue;
            }

            let live = self.ranker.live_count();
            if last_publish.map_or(true, |t| t.elapsed() >= slice) || live != last_sources {
                self.publish_progress(&session);
                last_publish = Some(Instant::now());
                last_sources = live;
            }

            let Some(worker) = self.ranker.poll_best_source(slice) else {
                continue;
            };
            if self.is_stopping() || self.paused.load(Ordering::SeqCst) {
                self.ranker.on_available(worker);
                continue;
            }
            self.assign(worker, &session, events, slice);
        }
    }

    fn assign(
        &self,
        worker: Arc<RangeDownloader>,
        session: &Arc<WorkSession>,
        events: &Arc<dyn WorkerEvents>,
        slice: Duration,
    ) {
        match session.tracker.poll_next_range(slice) {
            NextRange::Assigned(range) => {
                debug!(worker = worker.id(), %range, kbs = ?worker.get_kbs(), "assigning range");
                worker.download(range, session, events);
            }
            NextRange::Pending | NextRange::Exhausted => self.ranker.on_available(worker),
        }
    }
}
