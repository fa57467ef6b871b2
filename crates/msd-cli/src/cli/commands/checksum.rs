//! `msd checksum`: digest of a local file.

use anyhow::Result;
use msd_core::checksum::{self, DigestAlgorithm};
use std::path::Path;

/// Compute and print the digest of the given file in `sha256sum` format.
pub async fn run_checksum(path: &Path, sha1: bool) -> Result<()> {
    let algorithm = if sha1 {
        DigestAlgorithm::Sha1
    } else {
        DigestAlgorithm::Sha256
    };
    let owned = path.to_path_buf();
    let digest = tokio::task::spawn_blocking(move || checksum::digest_path(&owned, algorithm)).await??;
    println!("{}  {}", digest, path.display());
    Ok(())
}
