use std::collections::BTreeMap;

use crate::segmenter::ByteRange;

/// Completed ranges not yet delivered to a reader, keyed by `min`.
#[derive(Debug, Default, Clone)]
pub struct CompletedLedger {
    ranges: BTreeMap<u64, ByteRange>,
}

impl CompletedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, range: ByteRange) {
        self.ranges.insert(range.min, range);
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Remove and return the contiguous span starting at `cursor`, merging
    /// every adjacent range after it. Entries wholly below `cursor` were
    /// already delivered and are dropped. `None` when the range at `cursor`
    /// has not completed yet.
    pub fn take_contiguous(&mut self, cursor: u64) -> Option<ByteRange> {
        while let Some((_, first)) = self.ranges.first_key_value() {
            if first.max >= cursor {
                break;
            }
            self.ranges.pop_first();
        }

        let mut next = cursor;
        while let Some((&min, &range)) = self.ranges.first_key_value() {
            if min > next {
                break;
            }
            self.ranges.remove(&min);
            next = next.max(range.max + 1);
        }
        (next > cursor).then(|| ByteRange::new(cursor, next - 1))
    }
}
