//! Positional reads and writes on the shared file.

use anyhow::{Context, Result};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(not(unix))]
use std::sync::Mutex;

/// Handle to the download file. Cheap to clone; all clones share one open file.
///
/// On Unix every access is `pread`/`pwrite`, so concurrent use needs no
/// locking. Elsewhere the file cursor is shared and accesses are serialized.
#[derive(Clone, Debug)]
pub struct StorageWriter {
    file: Arc<File>,
    path: PathBuf,
    #[cfg(not(unix))]
    cursor: Arc<Mutex<()>>,
}

impl StorageWriter {
    pub(crate) fn from_file_and_path(file: File, path: PathBuf) -> Self {
        Self {
            file: Arc::new(file),
            path,
            #[cfg(not(unix))]
            cursor: Arc::new(Mutex::new(())),
        }
    }

    /// Open a finished file for reading only (used to serve whole-file reads
    /// once the download is complete and the incomplete file has been renamed).
    pub fn open_read(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::from_file_and_path(file, path.to_path_buf()))
    }

    /// Write all of `data` at `offset`. Does not move any shared cursor on Unix.
    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.write_all_at(data, offset)
    }

    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let _guard = self.cursor.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut f = &*self.file;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)
    }

    /// Fill `buf` from `offset`. Callers only read ranges already confirmed complete.
    #[cfg(unix)]
    pub fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.read_exact_at(buf, offset)
    }

    #[cfg(not(unix))]
    pub fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        let _guard = self.cursor.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut f = &*self.file;
        f.seek(SeekFrom::Start(offset))?;
        f.read_exact(buf)
    }

    /// Sync file data to disk. Call before `finalize` for durability.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all().context("storage sync failed")?;
        Ok(())
    }

    /// Where the file currently lives.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rename the file to `final_path`. Consumes this handle; other clones keep
    /// reading the same inode on Unix. Fails across filesystems.
    pub fn finalize(self, final_path: &Path) -> Result<()> {
        let path = self.path.clone();
        drop(self.file);
        std::fs::rename(&path, final_path)
            .with_context(|| format!("failed to rename {} to {}", path.display(), final_path.display()))?;
        Ok(())
    }
}
