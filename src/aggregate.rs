//! Result aggregation across concurrently completing transactions.
//!
//! One [`ResultAggregator`] is created per run and shared (behind an `Arc`)
//! with every worker. Each counter is an independent atomic, so `record` is
//! lock-free and the totals do not depend on completion order.

use crate::transaction::Outcome;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals for one run.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    files: AtomicU64,
    bytes_saved: AtomicU64,
    committed: AtomicU64,
    reverted: AtomicU64,
    failed: AtomicU64,
    filtered: AtomicU64,
    cancelled: AtomicU64,
}

/// Point-in-time copy of the aggregator's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    /// Files that shrank (overwrite/copy) or were restored (restore).
    pub files: u64,
    /// Net bytes saved by committed transactions.
    pub bytes_saved: u64,
    pub committed: u64,
    pub reverted: u64,
    pub failed: u64,
    /// Candidates rejected by the eligibility filter.
    pub filtered: u64,
    /// Queued work dropped after cancellation.
    pub cancelled: u64,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the terminal outcome of one transaction.
    ///
    /// Only a commit with positive savings counts as a processed file, and
    /// negative savings never reduce the total.
    pub fn record(&self, outcome: &Outcome) {
        match outcome {
            Outcome::Committed { .. } => {
                self.committed.fetch_add(1, Ordering::Relaxed);
                let saved = outcome.bytes_saved();
                if saved > 0 {
                    self.files.fetch_add(1, Ordering::Relaxed);
                    self.bytes_saved.fetch_add(saved as u64, Ordering::Relaxed);
                }
            }
            Outcome::Reverted { .. } => {
                self.reverted.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Failed { .. } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record one file copied back from the backup tree.
    pub fn record_restored(&self) {
        self.files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record `count` queued jobs dropped after cancellation.
    pub fn record_cancelled(&self, count: u64) {
        self.cancelled.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            files: self.files.load(Ordering::Relaxed),
            bytes_saved: self.bytes_saved.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            reverted: self.reverted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Stage;
    use std::sync::Arc;

    fn committed(original: u64, new: u64) -> Outcome {
        Outcome::Committed {
            original_size: original,
            new_size: new,
        }
    }

    #[test]
    fn commit_with_savings_counts_file_and_bytes() {
        let agg = ResultAggregator::new();
        agg.record(&committed(1000 * 1024, 700 * 1024));
        let snap = agg.snapshot();
        assert_eq!(snap.files, 1);
        assert_eq!(snap.bytes_saved, 300 * 1024);
        assert_eq!(snap.committed, 1);
    }

    #[test]
    fn zero_savings_commit_is_not_a_processed_file() {
        let agg = ResultAggregator::new();
        agg.record(&committed(500, 500));
        let snap = agg.snapshot();
        assert_eq!(snap.files, 0);
        assert_eq!(snap.bytes_saved, 0);
        assert_eq!(snap.committed, 1);
    }

    #[test]
    fn negative_savings_never_reduce_total() {
        let agg = ResultAggregator::new();
        agg.record(&committed(1000, 400));
        agg.record(&committed(1000, 1500));
        let snap = agg.snapshot();
        assert_eq!(snap.bytes_saved, 600);
        assert_eq!(snap.files, 1);
    }

    #[test]
    fn revert_and_failure_contribute_nothing() {
        let agg = ResultAggregator::new();
        agg.record(&Outcome::Reverted {
            original_size: 100,
            attempted_size: 200,
        });
        agg.record(&Outcome::Failed {
            stage: Stage::Transform,
            reason: "bad".into(),
        });
        let snap = agg.snapshot();
        assert_eq!(snap.files, 0);
        assert_eq!(snap.bytes_saved, 0);
        assert_eq!(snap.reverted, 1);
        assert_eq!(snap.failed, 1);
    }

    #[test]
    fn concurrent_records_sum_exactly() {
        let agg = Arc::new(ResultAggregator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let agg = Arc::clone(&agg);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        agg.record(&committed(10, 7));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = agg.snapshot();
        assert_eq!(snap.files, 8000);
        assert_eq!(snap.bytes_saved, 24_000);
    }
}
