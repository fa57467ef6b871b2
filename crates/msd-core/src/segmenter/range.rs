//! Inclusive byte range and chunk partitioning.

use std::fmt;

/// A byte range `[min, max]` over the target resource (both ends inclusive).
///
/// Ordering is by `min`, ties broken by `max` (field order of the derive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteRange {
    /// First byte offset (inclusive).
    pub min: u64,
    /// Last byte offset (inclusive).
    pub max: u64,
}

impl ByteRange {
    pub fn new(min: u64, max: u64) -> Self {
        debug_assert!(min <= max, "inverted range {}-{}", min, max);
        Self { min, max }
    }

    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        self.max - self.min + 1
    }

    /// Offset one past the last byte.
    pub fn end_exclusive(&self) -> u64 {
        self.max + 1
    }

    /// Range string in the form libcurl expects (`min-max`, no unit).
    pub fn curl_range(&self) -> String {
        format!("{}-{}", self.min, self.max)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// Splits `[0, size - 1]` into contiguous chunks of `chunk_size` bytes.
///
/// The last chunk may be shorter. Returns an empty vec if `size` or
/// `chunk_size` is 0.
pub fn partition(size: u64, chunk_size: u64) -> Vec<ByteRange> {
    if size == 0 || chunk_size == 0 {
        return Vec::new();
    }
    let count = size.div_ceil(chunk_size);
    let mut out = Vec::with_capacity(count as usize);
    let mut min = 0u64;
    while min < size {
        let max = (min + chunk_size - 1).min(size - 1);
        out.push(ByteRange::new(min, max));
        min = max + 1;
    }
    out
}
