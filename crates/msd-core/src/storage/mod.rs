//! The shared on-disk file.
//!
//! One random-access file per download, preallocated to the resource size.
//! Workers write disjoint ranges at their absolute offsets; stream readers
//! read back ranges already confirmed complete. The file is named
//! `<final>.part` until the download finishes and is renamed into place.

mod builder;
mod writer;

pub use builder::StorageWriterBuilder;
pub use writer::StorageWriter;

/// Suffix of the incomplete file before the final rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path of the incomplete file: appends `.part` (e.g. `file.iso` → `file.iso.part`).
pub fn temp_path(final_path: &std::path::Path) -> std::path::PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    std::path::PathBuf::from(o)
}
