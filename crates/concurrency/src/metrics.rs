//! Transaction counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters owned by the manager
///
/// Relaxed ordering: the counters are observational and synchronize nothing.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    committed: AtomicU64,
    aborted: AtomicU64,
    rolled_back: AtomicU64,
    failed_rollbacks: AtomicU64,
}

impl Counters {
    pub(crate) fn committed(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn aborted(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rolled_back(&self) {
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed_rollback(&self) {
        self.failed_rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, poisoned: bool) -> TransactionMetrics {
        TransactionMetrics {
            total_committed: self.committed.load(Ordering::Relaxed),
            total_aborted: self.aborted.load(Ordering::Relaxed),
            total_rolled_back: self.rolled_back.load(Ordering::Relaxed),
            total_failed_rollbacks: self.failed_rollbacks.load(Ordering::Relaxed),
            poisoned,
        }
    }
}

/// Transaction metrics
///
/// Provides statistics about transaction outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionMetrics {
    /// Batches applied in full
    pub total_committed: u64,
    /// Batches rejected before anything was written
    pub total_aborted: u64,
    /// Batches that failed mid-way and were restored
    pub total_rolled_back: u64,
    /// Batches whose restore failed
    pub total_failed_rollbacks: u64,
    /// Whether the manager refuses further writes until reload
    pub poisoned: bool,
}

impl TransactionMetrics {
    /// Total batches that reached a final state
    pub fn total_completed(&self) -> u64 {
        self.total_committed + self.total_aborted + self.total_rolled_back + self.total_failed_rollbacks
    }

    /// Commit success rate (committed / completed)
    pub fn commit_rate(&self) -> f64 {
        let completed = self.total_completed();
        if completed > 0 {
            self.total_committed as f64 / completed as f64
        } else {
            0.0
        }
    }
}
