//! Per-pipeline transfer counters.

use std::fmt;

/// A record or object that could not be transferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFailure {
    /// What failed (key, or `namespace/name`).
    pub item: String,
    /// Why it failed.
    pub reason: String,
}

/// Transfer statistics.
#[derive(Debug, Default, Clone)]
pub struct TransferStats {
    /// Items written to the destination (inserted, updated or created).
    pub transferred: u64,
    /// Items already present in the destination.
    pub skipped: u64,
    /// Items that failed.
    pub failed: u64,
    /// Details for every failed item.
    pub failures: Vec<TransferFailure>,
    /// Duration in seconds.
    pub duration_secs: f64,
}

impl TransferStats {
    /// Counts a transferred item.
    pub fn record_transferred(&mut self) {
        self.transferred += 1;
    }

    /// Counts an item that already existed.
    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    /// Counts a failed item and keeps the reason.
    pub fn record_failure(&mut self, item: impl Into<String>, reason: impl fmt::Display) {
        self.failed += 1;
        self.failures.push(TransferFailure {
            item: item.into(),
            reason: reason.to_string(),
        });
    }

    /// Adds another set of counters into this one.
    pub fn merge(&mut self, other: TransferStats) {
        self.transferred += other.transferred;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.failures.extend(other.failures);
        self.duration_secs += other.duration_secs;
    }

    /// Items seen in total.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.transferred + self.skipped + self.failed
    }

    /// True if nothing failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    /// Calculate throughput (items per second).
    #[must_use]
    pub fn throughput(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.total() as f64 / self.duration_secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for TransferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} transferred, {} skipped, {} failed",
            self.transferred, self.skipped, self.failed
        )
    }
}
