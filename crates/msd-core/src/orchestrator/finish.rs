//! Terminal transitions: completion hand-off and failure cleanup.

use std::io;
use std::sync::atomic::Ordering;

use tracing::{info, warn};

use super::Inner;
use crate::state::DownloadState;
use crate::storage::temp_path;
use crate::worker::WorkSession;

impl Inner {
    /// End the run with `outcome`, doing the completion hand-off or cleanup first.
    pub(super) fn finish(&self, outcome: DownloadState) {
        let session = self.lock_run().session.clone();
        let final_state = match (outcome, session) {
            (DownloadState::Complete, Some(session)) => self.complete(&session),
            (other, Some(session)) => {
                session.dispatcher.on_failure(&other.to_string());
                if self.remove_files.load(Ordering::SeqCst) {
                    self.remove_incomplete();
                }
                other
            }
            (other, None) => other,
        };

        info!(state = %final_state, "download finished");
        self.state.set(final_state);
        self.lock_run().finished = true;
        self.wake.notify_all();
    }

    /// Signal file-complete to readers, wait (bounded) for them to drain, then
    /// sync, close and move the incomplete file into place.
    fn complete(&self, session: &WorkSession) -> DownloadState {
        let dispatcher = &session.dispatcher;
        dispatcher.on_file_complete();

        let drain = self.config.drain_timeout();
        if !dispatcher.wait_for_writers(drain) {
            warn!(
                writers = dispatcher.active_writers(),
                timeout_secs = drain.as_secs(),
                "stream writers did not drain in time; finishing anyway"
            );
        }

        let Some(storage) = session.take_storage() else {
            return DownloadState::Aborted("download file already closed".to_string());
        };
        if let Err(e) = storage.sync() {
            return DownloadState::Aborted(format!("{e:#}"));
        }
        let final_path = self.complete_file();
        if let Err(e) = dispatcher.finalize_storage(storage, &final_path) {
            return DownloadState::Aborted(format!("{e:#}"));
        }
        info!(
            file = %final_path.display(),
            bytes = session.tracker.bytes_read(),
            "download complete"
        );
        DownloadState::Complete
    }

    /// Delete `<final>.part` if it exists.
    pub(super) fn remove_incomplete(&self) {
        let part = temp_path(&self.complete_file());
        match std::fs::remove_file(&part) {
            Ok(()) => info!(file = %part.display(), "removed incomplete file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(file = %part.display(), error = %e, "could not remove incomplete file"),
        }
    }
}
