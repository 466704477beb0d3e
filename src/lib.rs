//! Consistent shard routing for symbol-keyed time-series collections.
//!
//! Every trading symbol's quotes live in one collection on one shard. This
//! crate answers "which shard owns this symbol" and, when shards are added or
//! removed, moves collections so that storage matches the new ownership:
//! - **Bucket space**: symbols hash (xxHash64) into a fixed number of buckets
//! - **Ring**: an immutable bucket→node table swapped atomically on change
//! - **Migrator**: copy, verify and only then drop, bucket by bucket
//! - **Store adapter**: the document store behind a [`ShardStore`] trait
//!
//! # Example
//!
//! ```rust
//! use quoteshard::{MemoryStore, QuoteRecord, ShardConfig, ShardCoordinator};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ShardConfig::new(256, 2);
//!     let coordinator = ShardCoordinator::new(config, Arc::new(MemoryStore::new()))?;
//!
//!     // Writes go to the shard owning the symbol
//!     let quote = QuoteRecord::flat("AAPL", chrono::Utc::now(), 189.5);
//!     coordinator.insert_quotes(vec![quote]).await?;
//!     let owner = coordinator.get_node("AAPL")?;
//!
//!     // Scaling out moves only the buckets the new shard takes over
//!     let added = coordinator.add_node().await?;
//!     println!("{} took buckets from {:?}", added.new_database, added.old_database);
//!     assert!(added.report.is_complete());
//!
//!     let now = coordinator.get_node("AAPL")?;
//!     assert!(now == owner || now == added.new_node);
//!
//!     coordinator.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │          API layer (HTTP handlers)          │
//! └─────────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │             ShardCoordinator                │
//! │  • get_node / locate                        │
//! │  • add_node / remove_node / retry_migration │
//! │  • insert_quotes / execute / shard_stats    │
//! └─────────────────────────────────────────────┘
//!           │                       │
//!           ▼                       ▼
//! ┌───────────────────┐   ┌───────────────────┐
//! │    ShardRing      │   │     Migrator      │
//! │ Arc<BucketMap>    │   │ list → copy →     │
//! │ NodeRegistry      │   │ verify → drop     │
//! │ Stable/Rebalancing│   │ per gated bucket  │
//! └───────────────────┘   └───────────────────┘
//!                                   │
//!                                   ▼
//!                         ┌───────────────────┐
//!                         │    ShardStore     │
//!                         └───────────────────┘
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod partitioning;
pub mod rebalancing;
pub mod store;
pub mod testing;
pub mod types;

pub use config::{MigrationConfig, PlacementStrategy, ShardConfig, DEFAULT_TOTAL_BUCKETS};
pub use coordinator::{
    CommandOutcome, NodeAdded, NodeRemoved, ShardCommand, ShardCoordinator, ShardLocation,
    ShardStats,
};
pub use error::{Error, Result, StoreError};
pub use types::{BucketId, NodeId, QuoteRecord};

// Re-export partitioning types
pub use partitioning::{BucketMap, NodeRegistry, RingState, ShardRing};

// Re-export rebalancing types
pub use rebalancing::{
    BucketFailure, BucketMove, FailureReason, MigrationFence, MigrationPlan, MigrationReport,
    MigrationStep, Migrator, RebalanceMetrics, RebalanceMetricsSnapshot, TopologyChange,
};

// Re-export store types
pub use store::{MemoryStore, ShardStore};
