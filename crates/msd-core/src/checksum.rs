//! Content digests for verification after completion.
//!
//! Digests are computed on demand from the finished file, never inline with
//! range writes, so throughput is unaffected.

use anyhow::{bail, Context, Result};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const BUF_SIZE: usize = 64 * 1024;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha256,
    Sha1,
}

impl DigestAlgorithm {
    /// Length of the lowercase hex encoding.
    pub fn hex_len(self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 64,
            DigestAlgorithm::Sha1 => 40,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha1 => "sha1",
        }
    }
}

/// Expected content identifier: algorithm plus lowercase hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpectedDigest {
    pub algorithm: DigestAlgorithm,
    pub hex: String,
}

impl ExpectedDigest {
    /// Parse `sha256:<hex>`, `sha1:<hex>`, or a bare 64-character SHA-256 hex string.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (algorithm, hex) = match s.split_once(':') {
            Some((name, hex)) => {
                let algorithm = match name.to_ascii_lowercase().as_str() {
                    "sha256" | "sha-256" => DigestAlgorithm::Sha256,
                    "sha1" | "sha-1" => DigestAlgorithm::Sha1,
                    other => bail!("unsupported digest algorithm: {other}"),
                };
                (algorithm, hex)
            }
            None => (DigestAlgorithm::Sha256, s),
        };
        let hex = hex.to_ascii_lowercase();
        if hex.len() != algorithm.hex_len() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            bail!("invalid {} digest: {hex}", algorithm.name());
        }
        Ok(Self { algorithm, hex })
    }

    /// True if `actual_hex` (any case) equals this digest.
    pub fn matches(&self, actual_hex: &str) -> bool {
        self.hex.eq_ignore_ascii_case(actual_hex)
    }
}

impl fmt::Display for ExpectedDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.name(), self.hex)
    }
}

fn hash_reader<D: Digest, R: Read>(mut r: R, path: &Path) -> Result<String> {
    let mut hasher = D::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = r
            .read(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Digest a file with `algorithm`, returned as lowercase hex. Reads in
/// chunks so memory use stays bounded for large files.
pub fn digest_path(path: &Path, algorithm: DigestAlgorithm) -> Result<String> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    match algorithm {
        DigestAlgorithm::Sha256 => hash_reader::<Sha256, _>(f, path),
        DigestAlgorithm::Sha1 => hash_reader::<Sha1, _>(f, path),
    }
}

/// SHA-256 of a file as lowercase hex.
pub fn sha256_path(path: &Path) -> Result<String> {
    digest_path(path, DigestAlgorithm::Sha256)
}

/// SHA-256 of an in-memory buffer as lowercase hex.
pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
