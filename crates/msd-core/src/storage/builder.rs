//! Creates the incomplete `<final>.part` file and sizes it up front.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use super::writer::StorageWriter;

/// Opens the incomplete file; `preallocate` then `build` to get the
/// `StorageWriter` shared by every worker and stream reader.
pub struct StorageWriterBuilder {
    file: File,
    part_path: PathBuf,
}

impl StorageWriterBuilder {
    /// Create (or truncate) `part_path`, making its directory if needed.
    /// Opened read+write so readers can stream from the same handle.
    pub fn create(part_path: &Path) -> Result<Self> {
        if let Some(dir) = part_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
        }
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(part_path)
            .with_context(|| format!("create incomplete file {}", part_path.display()))?;
        Ok(Self {
            file,
            part_path: part_path.to_path_buf(),
        })
    }

    /// Reserve `size` bytes so workers can write any offset. Uses
    /// `posix_fallocate` on Unix, `set_len` when that is refused or elsewhere.
    pub fn preallocate(&mut self, size: u64) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        #[cfg(unix)]
        {
            let r = unsafe { libc::posix_fallocate(self.file.as_raw_fd(), 0, size as libc::off_t) };
            if r == 0 {
                return Ok(());
            }
            tracing::debug!(
                file = %self.part_path.display(),
                error = %std::io::Error::from_raw_os_error(r),
                "posix_fallocate refused; extending with set_len"
            );
        }
        self.file
            .set_len(size)
            .with_context(|| format!("size {} to {size} bytes", self.part_path.display()))
    }

    pub fn build(self) -> StorageWriter {
        StorageWriter::from_file_and_path(self.file, self.part_path)
    }
}
