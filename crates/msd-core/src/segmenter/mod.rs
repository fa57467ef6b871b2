//! Range math and work partitioning.
//!
//! Splits a resource into contiguous chunks (`ByteRange`), picks the chunk
//! size from the file size and the number of sources, and tracks which
//! chunks are unassigned, in flight, or done (`RangeTracker`).

mod range;
mod size;
mod tracker;

pub use range::{partition, ByteRange};
pub use size::{select_size, DIFFERENTIAL_SPEED_FACTOR, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
pub use tracker::{NextRange, RangeTracker, TrackerError};
