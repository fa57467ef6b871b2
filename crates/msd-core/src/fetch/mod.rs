//! The range-fetch boundary.
//!
//! Workers never talk HTTP directly; they go through a [`RangeFetcher`],
//! which can probe a source cheaply and fetch one inclusive byte range from
//! it. [`CurlFetcher`] is the libcurl implementation; tests substitute an
//! in-memory one.

mod curl_fetcher;
mod error;
mod host;
mod parse;

pub use curl_fetcher::CurlFetcher;
pub use error::FetchError;
pub use host::HostKey;
pub use parse::{parse_content_range, parse_http_status, parse_probe_headers, ContentRange};

use crate::segmenter::ByteRange;
use std::fmt;
use std::io;

/// How a source is reached. Peers are endpoints that serve the same content
/// but should not be hit with parallel connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Http,
    Peer,
}

/// Basic-auth credentials for a source.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One candidate location of the resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub uri: String,
    pub kind: SourceKind,
    pub credentials: Option<Credentials>,
}

impl Source {
    pub fn http(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            kind: SourceKind::Http,
            credentials: None,
        }
    }

    pub fn peer(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            kind: SourceKind::Peer,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Plain sources (HTTP, no credentials) may take several connections per host.
    pub fn is_plain(&self) -> bool {
        self.kind == SourceKind::Http && self.credentials.is_none()
    }

    /// Host grouping key used for per-host connection caps.
    pub fn host_key(&self) -> HostKey {
        HostKey::from_uri(&self.uri)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SourceKind::Http => write!(f, "{}", self.uri),
            SourceKind::Peer => write!(f, "peer {}", self.uri),
        }
    }
}

/// Result of a reachability probe: what the source says about the resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeInfo {
    /// Total size in bytes, if `Content-Length` is present.
    pub content_length: Option<u64>,
    /// True if the source advertised `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
    /// `Content-Disposition` value if present (filename hint).
    pub content_disposition: Option<String>,
}

/// Sink for fetched bytes, called in order with consecutive slices of the range.
pub type ByteSink<'a> = dyn FnMut(&[u8]) -> io::Result<()> + 'a;

/// A transport able to probe a source and fetch byte ranges from it.
///
/// Both calls block the current thread. Implementations must deliver exactly
/// `range.len()` bytes on success and return `FetchError::Truncated` otherwise.
/// A sink error aborts the fetch and is returned as `FetchError::Storage`.
pub trait RangeFetcher: Send + Sync {
    fn probe(&self, source: &Source) -> Result<ProbeInfo, FetchError>;

    fn fetch(&self, source: &Source, range: ByteRange, sink: &mut ByteSink<'_>) -> Result<u64, FetchError>;
}
