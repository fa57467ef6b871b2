//! Download and verification states.
//!
//! States are plain values compared by equality; observers are only told
//! about a change when the new value differs from the current one.

use std::fmt;

/// State of a multi-source download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadState {
    Idle,
    GettingSources,
    /// Transferring; `kbs` is the aggregate rate, `sources` the busy worker count.
    Downloading { kbs: u64, sources: usize },
    Paused,
    Complete,
    Canceled,
    /// Every source was tried and none is left.
    NoSourcesAvailable,
    /// Resolution failed or produced nothing to try.
    CouldNotDetermineSources,
    /// An invariant was violated or local storage failed.
    Aborted(String),
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Complete
                | DownloadState::Canceled
                | DownloadState::NoSourcesAvailable
                | DownloadState::CouldNotDetermineSources
                | DownloadState::Aborted(_)
        )
    }

    pub fn is_success(&self) -> bool {
        *self == DownloadState::Complete
    }

    /// Terminal and not `Complete`.
    pub fn is_failure(&self) -> bool {
        self.is_terminal() && !self.is_success()
    }

    /// Still working towards a result (including paused).
    pub fn is_in_progress(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadState::Idle => f.write_str("idle"),
            DownloadState::GettingSources => f.write_str("getting sources"),
            DownloadState::Downloading { kbs, sources } => {
                write!(f, "downloading at {kbs} KiB/s from {sources} source(s)")
            }
            DownloadState::Paused => f.write_str("paused"),
            DownloadState::Complete => f.write_str("complete"),
            DownloadState::Canceled => f.write_str("canceled"),
            DownloadState::NoSourcesAvailable => f.write_str("no sources available"),
            DownloadState::CouldNotDetermineSources => f.write_str("could not determine sources"),
            DownloadState::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

/// Why verification rejected a finished download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    Size { expected: u64, actual: u64 },
    Digest { expected: String, actual: String },
    /// The finished file could not be read back.
    Unreadable(String),
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::Size { expected, actual } => {
                write!(f, "size mismatch: expected {expected} bytes, got {actual}")
            }
            Mismatch::Digest { expected, actual } => {
                write!(f, "digest mismatch: expected {expected}, got {actual}")
            }
            Mismatch::Unreadable(e) => write!(f, "could not read finished file: {e}"),
        }
    }
}

/// State of a digest-verifying download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyState {
    Downloading(DownloadState),
    Failed(DownloadState),
    Verifying,
    Verified,
    Mismatch(Mismatch),
}

impl VerifyState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VerifyState::Failed(_) | VerifyState::Verified | VerifyState::Mismatch(_)
        )
    }

    pub fn is_downloading(&self) -> bool {
        matches!(self, VerifyState::Downloading(_))
    }
}

impl fmt::Display for VerifyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyState::Downloading(s) => fmt::Display::fmt(s, f),
            VerifyState::Failed(s) => write!(f, "failed ({s})"),
            VerifyState::Verifying => f.write_str("verifying"),
            VerifyState::Verified => f.write_str("verified"),
            VerifyState::Mismatch(m) => write!(f, "mismatch: {m}"),
        }
    }
}
