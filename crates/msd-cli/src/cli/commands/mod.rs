//! CLI command handlers, one per file.

mod checksum;
mod completions;
pub(crate) mod get;
mod probe;

pub use checksum::run_checksum;
pub use completions::run_completions;
pub use get::run_get;
pub use probe::run_probe;
