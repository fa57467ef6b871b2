//! Typed failures of the range-fetch boundary.

use crate::segmenter::ByteRange;
use std::io;

/// Error returned by a probe or range fetch. Classified by `retry::classify`
/// before the worker decides whether to keep the source.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The source accepted the connection but sent no usable response.
    #[error("no response from source")]
    NoResponse,
    /// The response carried an unexpected status.
    #[error("HTTP {0}")]
    Http(u32),
    /// The `Content-Range` header was missing, malformed, or covered other bytes.
    #[error("content-range mismatch for {requested}: {received}")]
    ContentRangeMismatch { requested: ByteRange, received: String },
    /// The body ended before (or ran past) the requested range.
    #[error("truncated body: expected {expected} bytes, got {received}")]
    Truncated { expected: u64, received: u64 },
    /// Could not connect or resolve the host.
    #[error("source unreachable: {0}")]
    Unreachable(String),
    /// Writing the received bytes failed locally (disk full, permission denied).
    #[error("storage: {0}")]
    Storage(#[source] io::Error),
    /// Any other transport-level failure.
    #[error(transparent)]
    Transport(#[from] curl::Error),
}
