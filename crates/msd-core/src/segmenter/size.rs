//! Chunk size selection.

/// Smallest chunk handed to a worker when more than one source is in play.
pub const MIN_CHUNK_SIZE: u64 = 30 * 1024;
/// Largest chunk handed to a worker.
pub const MAX_CHUNK_SIZE: u64 = 512 * 1024;
/// Bias toward many small chunks so one slow source cannot stall the whole file.
pub const DIFFERENTIAL_SPEED_FACTOR: u64 = 10;

/// Picks the chunk size for a file of `file_size` bytes fetched from
/// `num_sources` sources.
///
/// With a single source (or none yet) the whole file is one chunk. Otherwise
/// the per-source share is divided by [`DIFFERENTIAL_SPEED_FACTOR`], rounded
/// up, clamped to `[MIN_CHUNK_SIZE, MAX_CHUNK_SIZE]` and capped at the file
/// size.
pub fn select_size(file_size: u64, num_sources: usize) -> u64 {
    if num_sources <= 1 {
        return file_size;
    }
    let per_source = file_size / num_sources as u64;
    let theoretical = per_source.div_ceil(DIFFERENTIAL_SPEED_FACTOR);
    theoretical
        .clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
        .min(file_size)
}
