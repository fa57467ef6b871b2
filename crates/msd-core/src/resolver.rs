//! Resolution of a download request into candidate sources.
//!
//! The downloader only depends on this trait and does not know how sources
//! are discovered (mirror lists, peer queries, a fixed list on the command line).

use crate::checksum::ExpectedDigest;
use crate::fetch::Source;

/// What resolution learned about the resource.
#[derive(Debug, Clone, Default)]
pub struct ResolvedSources {
    pub sources: Vec<Source>,
    /// Size in bytes, when known ahead of probing.
    pub size: Option<u64>,
    pub expected_digest: Option<ExpectedDigest>,
    /// Name for the finished file; derived from the first source when absent.
    pub final_name: Option<String>,
}

/// Turns a request into sources. Called once, on the download's own thread.
pub trait SourceResolver: Send + Sync {
    fn resolve(&self) -> anyhow::Result<ResolvedSources>;
}

/// Resolver over a fixed, already-known set of sources.
#[derive(Debug, Clone, Default)]
pub struct StaticSources(pub ResolvedSources);

impl StaticSources {
    pub fn new(sources: Vec<Source>) -> Self {
        Self(ResolvedSources {
            sources,
            ..ResolvedSources::default()
        })
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.0.size = Some(size);
        self
    }

    pub fn with_digest(mut self, digest: ExpectedDigest) -> Self {
        self.0.expected_digest = Some(digest);
        self
    }

    pub fn with_final_name(mut self, name: impl Into<String>) -> Self {
        self.0.final_name = Some(name.into());
        self
    }
}

impl SourceResolver for StaticSources {
    fn resolve(&self) -> anyhow::Result<ResolvedSources> {
        Ok(self.0.clone())
    }
}
