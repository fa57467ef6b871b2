//! Progress snapshot (bytes done, rate, ETA).

/// Snapshot of one download's progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressStats {
    /// Bytes in completed ranges.
    pub bytes_done: u64,
    /// Resource size, once known.
    pub total_bytes: Option<u64>,
    /// Seconds since the download started.
    pub elapsed_secs: f64,
    pub ranges_done: usize,
    pub range_count: usize,
    /// Workers currently live (busy, idle, or backing off).
    pub active_sources: usize,
}

impl ProgressStats {
    /// Aggregate rate in bytes per second (0 if no time has passed).
    pub fn bytes_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.bytes_done as f64 / self.elapsed_secs
    }

    /// Aggregate rate in whole KiB/s.
    pub fn kbs(&self) -> u64 {
        (self.bytes_per_sec() / 1024.0) as u64
    }

    /// Estimated seconds remaining (None if size or rate is unknown).
    pub fn eta_secs(&self) -> Option<f64> {
        let remaining = self.total_bytes?.saturating_sub(self.bytes_done);
        if remaining == 0 {
            return Some(0.0);
        }
        let rate = self.bytes_per_sec();
        (rate > 0.0).then(|| remaining as f64 / rate)
    }

    /// Fraction complete in [0.0, 1.0]; None until the size is known.
    pub fn fraction(&self) -> Option<f64> {
        let total = self.total_bytes?;
        if total == 0 {
            return Some(1.0);
        }
        Some((self.bytes_done as f64 / total as f64).min(1.0))
    }
}
