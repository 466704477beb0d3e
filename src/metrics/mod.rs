//! Lock-free metric primitives.
//!
//! Rebalancing aggregates these in
//! [`RebalanceMetrics`](crate::rebalancing::RebalanceMetrics); callers read
//! them through a plain snapshot struct.

mod counters;
mod histograms;

pub use counters::{Counter, Gauge};
pub use histograms::{Histogram, HistogramSnapshot, HistogramTimer, MIGRATION_DURATION_BUCKETS};
