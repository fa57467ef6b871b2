use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::launcher::copy_span;
use super::{CompletedLedger, LaunchError, Launcher};
use crate::segmenter::ByteRange;
use crate::storage::StorageWriter;

/// Where whole-file reads come from.
enum FileSource {
    /// The incomplete file, still held by the download.
    Live(StorageWriter),
    /// The finished file after the download released its handle.
    Finished(PathBuf),
}

struct DispatchState {
    global: CompletedLedger,
    readers: Vec<Arc<Launcher>>,
    file_complete: bool,
    failure: Option<String>,
    source: FileSource,
    writers: usize,
    next_reader_id: u64,
}

/// Fan-out point between workers and stream readers.
///
/// Keeps the canonical ledger of completed ranges, forwards each completion
/// and the terminal event to every attached reader, and counts in-flight
/// `write` calls so the download can wait for them before moving the file.
pub struct Dispatcher {
    size: u64,
    wait_slice: Duration,
    state: Mutex<DispatchState>,
    drained: Condvar,
}

/// Counts one in-flight `write` for the lifetime of the guard.
struct WriterGuard<'a>(&'a Dispatcher);

impl<'a> WriterGuard<'a> {
    fn new(d: &'a Dispatcher) -> Self {
        d.lock().writers += 1;
        WriterGuard(d)
    }
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        let mut st = self.0.lock();
        st.writers = st.writers.saturating_sub(1);
        drop(st);
        self.0.drained.notify_all();
    }
}

enum Plan {
    WholeFile(StorageWriter),
    WholePath(PathBuf),
    Stream(Arc<Launcher>, StorageWriter),
}

impl Dispatcher {
    pub fn new(size: u64, storage: StorageWriter, wait_slice: Duration) -> Self {
        Self {
            size,
            wait_slice,
            state: Mutex::new(DispatchState {
                global: CompletedLedger::new(),
                readers: Vec::new(),
                file_complete: false,
                failure: None,
                source: FileSource::Live(storage),
                writers: 0,
                next_reader_id: 1,
            }),
            drained: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn on_range_complete(&self, range: ByteRange) {
        let mut st = self.lock();
        st.global.insert(range);
        for reader in &st.readers {
            reader.on_range_complete(range);
        }
    }

    pub fn on_file_complete(&self) {
        let mut st = self.lock();
        st.file_complete = true;
        for reader in &st.readers {
            reader.on_file_complete();
        }
    }

    pub fn on_failure(&self, reason: &str) {
        let mut st = self.lock();
        st.failure.get_or_insert_with(|| reason.to_string());
        for reader in &st.readers {
            reader.on_failure(reason);
        }
    }

    /// Close the download file and rename it to `final_path`. Whole-file
    /// reads reopen the file by path from here on, so no handle outlives
    /// this call.
    pub fn finalize_storage(&self, storage: StorageWriter, final_path: &Path) -> anyhow::Result<()> {
        let part_path = storage.path().to_path_buf();
        let mut st = self.lock();
        st.source = FileSource::Finished(final_path.to_path_buf());
        if let Err(e) = storage.finalize(final_path) {
            st.source = FileSource::Finished(part_path);
            return Err(e);
        }
        drop(st);
        debug!(file = %final_path.display(), "download file closed and renamed");
        Ok(())
    }

    /// Number of `write` calls currently streaming.
    pub fn active_writers(&self) -> usize {
        self.lock().writers
    }

    /// Number of readers attached to the live download.
    pub fn attached_readers(&self) -> usize {
        self.lock().readers.len()
    }

    /// Wait up to `timeout` for every in-flight `write` to return. True if drained.
    pub fn wait_for_writers(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.lock();
        while st.writers > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = (deadline - now).min(self.wait_slice);
            st = self
                .drained
                .wait_timeout(st, slice)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Stream the file to `out` in offset order, blocking until it is complete,
    /// the download fails, or `out` fails. Once the download is complete the
    /// file is copied straight from disk.
    pub fn write(&self, out: &mut dyn Write) -> Result<u64, LaunchError> {
        let _guard = WriterGuard::new(self);

        let plan = {
            let mut guard = self.lock();
            let st = &mut *guard;
            if let Some(reason) = &st.failure {
                return Err(LaunchError::Aborted(reason.clone()));
            }
            match &st.source {
                FileSource::Finished(path) => Plan::WholePath(path.clone()),
                FileSource::Live(storage) if st.file_complete => Plan::WholeFile(storage.clone()),
                FileSource::Live(storage) => {
                    let storage = storage.clone();
                    let id = st.next_reader_id;
                    st.next_reader_id += 1;
                    let launcher = Arc::new(Launcher::new(id, self.size, st.global.clone()));
                    st.readers.push(Arc::clone(&launcher));
                    debug!(reader = id, seeded = st.global.len(), "stream reader attached");
                    Plan::Stream(launcher, storage)
                }
            }
        };

        match plan {
            Plan::WholePath(path) => {
                let storage = StorageWriter::open_read(&path).map_err(LaunchError::Storage)?;
                self.copy_whole(&storage, out)
            }
            Plan::WholeFile(storage) => self.copy_whole(&storage, out),
            Plan::Stream(launcher, storage) => {
                let result = launcher.run(&storage, out, self.wait_slice);
                self.lock().readers.retain(|r| r.id() != launcher.id());
                if let Err(e) = &result {
                    info!(reader = launcher.id(), error = %e, "stream reader ended early");
                }
                result
            }
        }
    }

    fn copy_whole(&self, storage: &StorageWriter, out: &mut dyn Write) -> Result<u64, LaunchError> {
        if self.size > 0 {
            let mut buf = vec![0u8; 64 * 1024];
            copy_span(storage, out, ByteRange::new(0, self.size - 1), &mut buf)?;
        }
        out.flush().map_err(LaunchError::Consumer)?;
        Ok(self.size)
    }
}
