//! Rebalance counters shared by the coordinator and the migrator.

use crate::metrics::{Counter, Gauge, Histogram, HistogramSnapshot};
use serde::Serialize;

/// Rebalancing metrics.
#[derive(Debug)]
pub struct RebalanceMetrics {
    /// Topology changes that required a migration.
    pub rebalances_started: Counter,
    /// Rebalances that reached Stable.
    pub rebalances_completed: Counter,
    /// Migration passes that left failed buckets behind.
    pub rebalances_partial: Counter,
    /// Migration passes run, retries included.
    pub migration_passes: Counter,
    pub buckets_moved: Counter,
    pub buckets_failed: Counter,
    pub collections_copied: Counter,
    pub documents_copied: Counter,
    pub step_timeouts: Counter,
    /// 1 while the ring is Rebalancing.
    pub rebalancing: Gauge,
    /// Seconds per migration pass.
    pub migration_duration: Histogram,
}

impl Default for RebalanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RebalanceMetrics {
    pub fn new() -> Self {
        Self {
            rebalances_started: Counter::new("rebalances_started_total"),
            rebalances_completed: Counter::new("rebalances_completed_total"),
            rebalances_partial: Counter::new("rebalances_partial_total"),
            migration_passes: Counter::new("migration_passes_total"),
            buckets_moved: Counter::new("buckets_moved_total"),
            buckets_failed: Counter::new("buckets_failed_total"),
            collections_copied: Counter::new("collections_copied_total"),
            documents_copied: Counter::new("documents_copied_total"),
            step_timeouts: Counter::new("migration_step_timeouts_total"),
            rebalancing: Gauge::new("ring_rebalancing"),
            migration_duration: Histogram::new("migration_duration_seconds"),
        }
    }

    /// Count a finished pass. Its duration is recorded by the pass timer.
    pub fn record_pass(&self, moved: usize, failed: usize) {
        self.migration_passes.inc();
        self.buckets_moved.inc_by(moved as u64);
        self.buckets_failed.inc_by(failed as u64);
    }

    pub fn snapshot(&self) -> RebalanceMetricsSnapshot {
        RebalanceMetricsSnapshot {
            rebalances_started: self.rebalances_started.get(),
            rebalances_completed: self.rebalances_completed.get(),
            rebalances_partial: self.rebalances_partial.get(),
            migration_passes: self.migration_passes.get(),
            buckets_moved: self.buckets_moved.get(),
            buckets_failed: self.buckets_failed.get(),
            collections_copied: self.collections_copied.get(),
            documents_copied: self.documents_copied.get(),
            step_timeouts: self.step_timeouts.get(),
            rebalancing: self.rebalancing.get() > 0,
            migration_duration: self.migration_duration.snapshot(),
        }
    }
}

/// Point-in-time copy of [`RebalanceMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct RebalanceMetricsSnapshot {
    pub rebalances_started: u64,
    pub rebalances_completed: u64,
    pub rebalances_partial: u64,
    pub migration_passes: u64,
    pub buckets_moved: u64,
    pub buckets_failed: u64,
    pub collections_copied: u64,
    pub documents_copied: u64,
    pub step_timeouts: u64,
    pub rebalancing: bool,
    pub migration_duration: HistogramSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_pass() {
        let metrics = RebalanceMetrics::new();
        drop(metrics.migration_duration.start_timer());
        metrics.record_pass(3, 1);
        metrics.rebalancing.set(1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.migration_passes, 1);
        assert_eq!(snapshot.buckets_moved, 3);
        assert_eq!(snapshot.buckets_failed, 1);
        assert_eq!(snapshot.migration_duration.count, 1);
        assert!(snapshot.rebalancing);
    }
}
