use std::io::Write;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, trace};

use super::{CompletedLedger, LaunchError};
use crate::segmenter::ByteRange;
use crate::storage::StorageWriter;

/// Bytes copied from disk to the consumer per read.
const COPY_CHUNK: usize = 64 * 1024;

struct ReaderState {
    cursor: u64,
    ledger: CompletedLedger,
    file_complete: bool,
    failure: Option<String>,
}

/// One stream reader: delivers the file to its output strictly by offset.
pub struct Launcher {
    id: u64,
    size: u64,
    state: Mutex<ReaderState>,
    ready: Condvar,
}

impl Launcher {
    /// A reader at offset zero, seeded with ranges that completed before it attached.
    pub(crate) fn new(id: u64, size: u64, seed: CompletedLedger) -> Self {
        Self {
            id,
            size,
            state: Mutex::new(ReaderState {
                cursor: 0,
                ledger: seed,
                file_complete: false,
                failure: None,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next offset this reader needs.
    pub fn cursor(&self) -> u64 {
        self.lock().cursor
    }

    pub(crate) fn on_range_complete(&self, range: ByteRange) {
        self.lock().ledger.insert(range);
        self.ready.notify_all();
    }

    pub(crate) fn on_file_complete(&self) {
        self.lock().file_complete = true;
        self.ready.notify_all();
    }

    pub(crate) fn on_failure(&self, reason: &str) {
        self.lock().failure.get_or_insert_with(|| reason.to_string());
        self.ready.notify_all();
    }

    /// Block until the next contiguous span is available. `None` once the
    /// cursor has passed the end of the file. A file-complete notice alone
    /// never ends the wait while a gap remains below the end.
    fn next_span(&self, wait_slice: Duration) -> Result<Option<ByteRange>, LaunchError> {
        let mut st = self.lock();
        loop {
            if st.cursor >= self.size {
                return Ok(None);
            }
            if let Some(reason) = &st.failure {
                return Err(LaunchError::Aborted(reason.clone()));
            }
            let cursor = st.cursor;
            if let Some(span) = st.ledger.take_contiguous(cursor) {
                return Ok(Some(span));
            }
            let (guard, res) = self
                .ready
                .wait_timeout(st, wait_slice)
                .unwrap_or_else(PoisonError::into_inner);
            st = guard;
            if res.timed_out() {
                trace!(
                    reader = self.id,
                    cursor = st.cursor,
                    file_complete = st.file_complete,
                    pending = st.ledger.len(),
                    "stream reader still waiting for next range"
                );
            }
        }
    }

    /// Stream the whole file to `out` in offset order. Returns bytes delivered.
    pub fn run(&self, storage: &StorageWriter, out: &mut dyn Write, wait_slice: Duration) -> Result<u64, LaunchError> {
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut delivered = 0u64;
        while let Some(span) = self.next_span(wait_slice)? {
            copy_span(storage, out, span, &mut buf)?;
            delivered += span.len();
            self.lock().cursor = span.max + 1;
        }
        out.flush().map_err(LaunchError::Consumer)?;
        debug!(reader = self.id, delivered, "stream reader finished");
        Ok(delivered)
    }
}

/// Copy `span` from the file to `out`.
pub(crate) fn copy_span(
    storage: &StorageWriter,
    out: &mut dyn Write,
    span: ByteRange,
    buf: &mut [u8],
) -> Result<(), LaunchError> {
    let mut offset = span.min;
    let end = span.end_exclusive();
    while offset < end {
        let n = (end - offset).min(buf.len() as u64) as usize;
        storage
            .read_exact_at(offset, &mut buf[..n])
            .map_err(LaunchError::Storage)?;
        out.write_all(&buf[..n]).map_err(LaunchError::Consumer)?;
        offset += n as u64;
    }
    Ok(())
}
