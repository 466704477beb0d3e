//! Rebalancing: moving bucket data after a topology change.
//!
//! A topology change on the [`ShardRing`](crate::partitioning::ShardRing)
//! yields a [`MigrationPlan`]. The [`Migrator`] executes it against the store
//! and produces a [`MigrationReport`], which the ring uses to decide between
//! Stable and Rebalancing.
//!
//! # Flow
//!
//! ```text
//! ┌──────────────┐  add/remove   ┌───────────────┐
//! │  ShardRing   │──────────────▶│ MigrationPlan │ old ring, new ring, moves
//! └──────────────┘               └───────┬───────┘
//!        ▲                               │
//!        │ complete_rebalance            ▼
//!        │                       ┌───────────────┐  list / count / copy
//!        └───────────────────────│   Migrator    │─────────────────────▶ ShardStore
//!            MigrationReport     └───────────────┘  verify / drop
//! ```
//!
//! Per bucket the order is list, copy, verify, then drop. The source is never
//! dropped before every copy of the bucket is verified; a failed bucket keeps
//! its data on the previous owner and is retried on its own. The
//! [`MigrationFence`] keeps routed writes out of a bucket while it moves and
//! tells writers which node holds each collection until the ring settles.
//!
//! # Example
//!
//! ```rust
//! use quoteshard::config::{MigrationConfig, ShardConfig};
//! use quoteshard::partitioning::ShardRing;
//! use quoteshard::rebalancing::Migrator;
//! use quoteshard::store::MemoryStore;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let ring = ShardRing::new(&ShardConfig::new(8, 2));
//! let migrator = Migrator::new(Arc::new(MemoryStore::new()), MigrationConfig::default());
//!
//! let plan = ring.add_node().unwrap();
//! let report = migrator.migrate_plan(&plan).await;
//! ring.complete_rebalance(plan.id, &report).unwrap();
//! # }
//! ```

mod fence;
mod metrics;
mod migrator;
mod plan;
mod report;

pub use fence::{ExclusiveGate, GateGuard, MigrationFence, SharedGate};
pub use metrics::{RebalanceMetrics, RebalanceMetricsSnapshot};
pub use migrator::Migrator;
pub use plan::{BucketMove, MigrationPlan, TopologyChange};
pub use report::{BucketFailure, FailureReason, MigrationReport, MigrationStep};
