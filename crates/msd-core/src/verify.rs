//! Digest-verifying wrapper around a downloader.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use tracing::{info, warn};

use crate::checksum::{digest_path, ExpectedDigest};
use crate::downloader::Downloader;
use crate::launch::LaunchError;
use crate::observer::{Listener, ListenerId, StateCell};
use crate::state::{DownloadState, Mismatch, VerifyState};

struct VerifyShared<D> {
    delegate: D,
    expected_digest: Option<ExpectedDigest>,
    expected_size: Option<u64>,
    state: StateCell<VerifyState>,
}

/// Wraps a downloader and checks the finished file's size and digest.
///
/// Transitions are driven only by the delegate's state changes. When the
/// delegate completes, verification runs on the thread that reported it.
pub struct VerifyingDownloader<D: Downloader<State = DownloadState>> {
    shared: Arc<VerifyShared<D>>,
    delegate_listener: ListenerId,
}

impl<D> VerifyingDownloader<D>
where
    D: Downloader<State = DownloadState> + 'static,
{
    /// `expected_digest` falls back to the delegate's resolved digest;
    /// `expected_size` falls back to the delegate's size.
    pub fn new(delegate: D, expected_digest: Option<ExpectedDigest>, expected_size: Option<u64>) -> Self {
        let initial = VerifyState::Downloading(delegate.state());
        let shared = Arc::new(VerifyShared {
            delegate,
            expected_digest,
            expected_size,
            state: StateCell::new(initial),
        });
        let weak: Weak<VerifyShared<D>> = Arc::downgrade(&shared);
        let delegate_listener = shared.delegate.add_listener(Arc::new(move |s: &DownloadState| {
            if let Some(shared) = weak.upgrade() {
                shared.on_delegate_state(s);
            }
        }));
        // A delegate that finished before the listener was attached never broadcasts again.
        let current = shared.delegate.state();
        if current.is_terminal() {
            shared.on_delegate_state(&current);
        }
        Self {
            shared,
            delegate_listener,
        }
    }

    pub fn delegate(&self) -> &D {
        &self.shared.delegate
    }
}

impl<D: Downloader<State = DownloadState>> VerifyShared<D> {
    fn on_delegate_state(&self, s: &DownloadState) {
        match s {
            DownloadState::Complete => self.verify(),
            s if s.is_failure() => {
                self.state
                    .set_if(VerifyState::Failed(s.clone()), |cur| !cur.is_terminal());
            }
            s => {
                let mut unexpected = false;
                self.state.set_if(VerifyState::Downloading(s.clone()), |cur| {
                    unexpected = !cur.is_downloading();
                    !unexpected
                });
                if unexpected {
                    warn!(delegate_state = %s, current = %self.state.get(), "ignoring delegate progress outside download phase");
                }
            }
        }
    }

    fn verify(&self) {
        let began = self.state.set_if(VerifyState::Verifying, |cur| cur.is_downloading());
        if !began {
            return;
        }
        let outcome = self.check();
        match &outcome {
            VerifyState::Verified => info!(file = %self.delegate.complete_file().display(), "download verified"),
            other => warn!(file = %self.delegate.complete_file().display(), state = %other, "verification failed"),
        }
        self.state.set(outcome);
    }

    fn check(&self) -> VerifyState {
        let path = self.delegate.complete_file();
        let actual = match std::fs::metadata(&path) {
            Ok(m) => m.len(),
            Err(e) => return VerifyState::Mismatch(Mismatch::Unreadable(e.to_string())),
        };
        if let Some(expected) = self.expected_size.or_else(|| self.delegate.size()) {
            if expected != actual {
                return VerifyState::Mismatch(Mismatch::Size { expected, actual });
            }
        }
        let Some(expected) = self.expected_digest.clone().or_else(|| self.delegate.expected_digest()) else {
            return VerifyState::Verified;
        };
        match digest_path(&path, expected.algorithm) {
            Ok(hex) if expected.matches(&hex) => VerifyState::Verified,
            Ok(hex) => VerifyState::Mismatch(Mismatch::Digest {
                expected: expected.to_string(),
                actual: format!("{}:{hex}", expected.algorithm.name()),
            }),
            Err(e) => VerifyState::Mismatch(Mismatch::Unreadable(format!("{e:#}"))),
        }
    }
}

impl<D: Downloader<State = DownloadState>> Drop for VerifyingDownloader<D> {
    fn drop(&mut self) {
        self.shared.delegate.remove_listener(self.delegate_listener);
    }
}

impl<D> Downloader for VerifyingDownloader<D>
where
    D: Downloader<State = DownloadState> + 'static,
{
    type State = VerifyState;

    fn start(&self) {
        self.shared.delegate.start();
    }

    fn pause(&self) {
        self.shared.delegate.pause();
    }

    fn resume(&self) {
        self.shared.delegate.resume();
    }

    fn stop(&self, remove_files: bool) {
        self.shared.delegate.stop(remove_files);
    }

    fn state(&self) -> VerifyState {
        self.shared.state.get()
    }

    fn add_listener(&self, listener: Listener<VerifyState>) -> ListenerId {
        self.shared.state.listeners().add(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.state.listeners().remove(id)
    }

    fn write(&self, out: &mut dyn Write, cancel_on_stream_close: bool) -> Result<u64, LaunchError> {
        self.shared.delegate.write(out, cancel_on_stream_close)
    }

    fn incomplete_file(&self) -> PathBuf {
        self.shared.delegate.incomplete_file()
    }

    fn complete_file(&self) -> PathBuf {
        self.shared.delegate.complete_file()
    }

    fn size(&self) -> Option<u64> {
        self.shared.delegate.size()
    }

    fn final_name(&self) -> String {
        self.shared.delegate.final_name()
    }

    fn expected_digest(&self) -> Option<ExpectedDigest> {
        self.shared
            .expected_digest
            .clone()
            .or_else(|| self.shared.delegate.expected_digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::sha256_bytes;
    use std::sync::Mutex;

    /// Delegate whose state is driven by the test.
    struct Scripted {
        state: StateCell<DownloadState>,
        path: PathBuf,
        size: Option<u64>,
    }

    impl Scripted {
        fn new(path: PathBuf, size: Option<u64>) -> Self {
            Self {
                state: StateCell::new(DownloadState::Idle),
                path,
                size,
            }
        }
    }

    impl Downloader for Scripted {
        type State = DownloadState;
        fn start(&self) {
            self.state.set(DownloadState::GettingSources);
        }
        fn pause(&self) {}
        fn resume(&self) {}
        fn stop(&self, _remove_files: bool) {
            self.state.set(DownloadState::Canceled);
        }
        fn state(&self) -> DownloadState {
            self.state.get()
        }
        fn add_listener(&self, l: Listener<DownloadState>) -> ListenerId {
            self.state.listeners().add(l)
        }
        fn remove_listener(&self, id: ListenerId) -> bool {
            self.state.listeners().remove(id)
        }
        fn write(&self, _out: &mut dyn Write, _c: bool) -> Result<u64, LaunchError> {
            Ok(0)
        }
        fn incomplete_file(&self) -> PathBuf {
            self.path.with_extension("part")
        }
        fn complete_file(&self) -> PathBuf {
            self.path.clone()
        }
        fn size(&self) -> Option<u64> {
            self.size
        }
        fn final_name(&self) -> String {
            "f".into()
        }
    }

    fn file_with(content: &[u8]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    fn record(v: &VerifyingDownloader<Scripted>) -> Arc<Mutex<Vec<VerifyState>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        v.add_listener(Arc::new(move |st: &VerifyState| s.lock().unwrap().push(st.clone())));
        seen
    }

    #[test]
    fn matching_digest_is_verified_once() {
        let (_dir, path) = file_with(b"payload");
        let digest = ExpectedDigest::parse(&sha256_bytes(b"payload")).unwrap();
        let v = VerifyingDownloader::new(Scripted::new(path, Some(7)), Some(digest), None);
        let seen = record(&v);

        v.start();
        v.delegate().state.set(DownloadState::Downloading { kbs: 1, sources: 1 });
        v.delegate().state.set(DownloadState::Complete);
        assert_eq!(v.state(), VerifyState::Verified);

        // A late duplicate completion must not re-verify or re-emit.
        v.delegate().state.set(DownloadState::Downloading { kbs: 2, sources: 1 });
        v.delegate().state.set(DownloadState::Complete);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.iter().filter(|s| **s == VerifyState::Verified).count(), 1);
        assert_eq!(
            *seen,
            vec![
                VerifyState::Downloading(DownloadState::GettingSources),
                VerifyState::Downloading(DownloadState::Downloading { kbs: 1, sources: 1 }),
                VerifyState::Verifying,
                VerifyState::Verified,
            ]
        );
    }

    #[test]
    fn wrong_digest_is_mismatch_never_verified() {
        let (_dir, path) = file_with(b"payload");
        let digest = ExpectedDigest::parse(&sha256_bytes(b"other")).unwrap();
        let v = VerifyingDownloader::new(Scripted::new(path, None), Some(digest), None);
        let seen = record(&v);
        v.delegate().state.set(DownloadState::Complete);
        assert!(matches!(v.state(), VerifyState::Mismatch(Mismatch::Digest { .. })));
        assert!(!seen.lock().unwrap().contains(&VerifyState::Verified));
    }

    #[test]
    fn wrong_size_is_mismatch_before_hashing() {
        let (_dir, path) = file_with(b"short");
        let v = VerifyingDownloader::new(Scripted::new(path, None), None, Some(100));
        v.delegate().state.set(DownloadState::Complete);
        assert_eq!(
            v.state(),
            VerifyState::Mismatch(Mismatch::Size { expected: 100, actual: 5 })
        );
    }

    #[test]
    fn delegate_failure_propagates() {
        let (_dir, path) = file_with(b"");
        let v = VerifyingDownloader::new(Scripted::new(path, None), None, None);
        v.delegate().state.set(DownloadState::NoSourcesAvailable);
        assert_eq!(v.state(), VerifyState::Failed(DownloadState::NoSourcesAvailable));
        v.stop(true);
        assert_eq!(v.state(), VerifyState::Failed(DownloadState::NoSourcesAvailable));
    }

    #[test]
    fn missing_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let v = VerifyingDownloader::new(Scripted::new(dir.path().join("gone"), None), None, None);
        v.delegate().state.set(DownloadState::Complete);
        assert!(matches!(v.state(), VerifyState::Mismatch(Mismatch::Unreadable(_))));
    }

    #[test]
    fn dropping_wrapper_detaches_from_delegate() {
        let (_dir, path) = file_with(b"");
        let v = VerifyingDownloader::new(Scripted::new(path, None), None, None);
        assert_eq!(v.delegate().state.listeners().len(), 1);
        let shared = Arc::clone(&v.shared);
        drop(v);
        assert!(shared.delegate.state.listeners().is_empty());
    }

    #[test]
    fn delegate_already_complete_is_verified_on_wrap() {
        let (_dir, path) = file_with(b"payload");
        let delegate = Scripted::new(path, Some(7));
        delegate.state.set(DownloadState::Complete);
        let digest = ExpectedDigest::parse(&sha256_bytes(b"payload")).unwrap();
        let v = VerifyingDownloader::new(delegate, Some(digest), None);
        assert_eq!(v.state(), VerifyState::Verified);
    }

    #[test]
    fn delegate_already_failed_is_failed_on_wrap() {
        let (_dir, path) = file_with(b"");
        let delegate = Scripted::new(path, None);
        delegate.state.set(DownloadState::Canceled);
        let v = VerifyingDownloader::new(delegate, None, None);
        assert_eq!(v.state(), VerifyState::Failed(DownloadState::Canceled));
    }
}
