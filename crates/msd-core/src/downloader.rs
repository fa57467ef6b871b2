//! The contract every downloader exposes to callers.

use std::io::Write;
use std::path::PathBuf;

use crate::checksum::ExpectedDigest;
use crate::launch::LaunchError;
use crate::observer::{Listener, ListenerId};

/// A download that can be started, paused, stopped, observed, and streamed.
///
/// Decorators implement this around an inner downloader and forward what
/// they do not change.
pub trait Downloader: Send + Sync {
    type State: Clone + PartialEq + Send + Sync + 'static;

    /// Begin downloading in the background. Calling it twice is a no-op.
    fn start(&self);

    /// Stop assigning new ranges; in-flight ranges finish.
    fn pause(&self);

    fn resume(&self);

    /// Cancel cooperatively. With `remove_files` the incomplete file is deleted.
    fn stop(&self, remove_files: bool);

    fn state(&self) -> Self::State;

    /// Register a state listener. Listeners run on whichever thread changed the state.
    fn add_listener(&self, listener: Listener<Self::State>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId) -> bool;

    /// Stream the file to `out` in offset order while it downloads. Blocks
    /// until the whole file is written or the stream ends early. With
    /// `cancel_on_stream_close`, a consumer failure stops the download when no
    /// other stream is still reading.
    fn write(&self, out: &mut dyn Write, cancel_on_stream_close: bool) -> Result<u64, LaunchError>;

    /// Location of the file while downloading (`<final>.part`).
    fn incomplete_file(&self) -> PathBuf;

    /// Location of the file once complete.
    fn complete_file(&self) -> PathBuf;

    /// Total size in bytes, once known.
    fn size(&self) -> Option<u64>;

    fn final_name(&self) -> String;

    /// Digest learned while resolving sources, if any.
    fn expected_digest(&self) -> Option<ExpectedDigest> {
        None
    }
}
