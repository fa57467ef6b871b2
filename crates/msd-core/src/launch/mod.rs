//! In-order streaming of a file that is still being downloaded.
//!
//! Ranges complete out of order. Every reader keeps a cursor and a ledger of
//! completed ranges it has not delivered yet; whenever the range at its
//! cursor is present it copies the contiguous run from disk and advances.
//! The [`Dispatcher`] fans completions out to readers and keeps a global
//! ledger so a reader attaching late starts from everything already done.

mod dispatcher;
mod launcher;
mod ledger;

pub use dispatcher::Dispatcher;
pub use launcher::Launcher;
pub use ledger::CompletedLedger;

use std::io;

/// Why a stream write ended early.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// Reading confirmed bytes back from the download file failed.
    #[error("reading downloaded bytes failed: {0}")]
    Storage(#[source] io::Error),
    /// The consumer's output failed or was closed.
    #[error("stream consumer failed: {0}")]
    Consumer(#[source] io::Error),
    /// The download failed or was canceled before the stream reached the end.
    #[error("download ended before the stream finished: {0}")]
    Aborted(String),
}

impl LaunchError {
    pub fn is_consumer(&self) -> bool {
        matches!(self, LaunchError::Consumer(_))
    }
}
