//! Configuration types for the routing core.

use crate::error::{Error, Result};
use crate::types::NodeId;
use std::time::Duration;

/// Default size of the bucket address space.
pub const DEFAULT_TOTAL_BUCKETS: u32 = 256;

/// How buckets are assigned to nodes when the node count changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlacementStrategy {
    /// Deterministic incremental assignment.
    ///
    /// The table for `n` nodes is the table for `n - 1` nodes plus the newest
    /// node taking `total / n` buckets from the most loaded nodes. Per-node
    /// counts never differ by more than one.
    #[default]
    Balanced,
    /// Buckets are hashed onto an xxHash64 ring of virtual nodes.
    VirtualNodes { vnodes_per_node: usize },
}

/// Main configuration for shard routing.
#[derive(Debug, Clone)]
pub struct ShardConfig {
    /// Size of the bucket address space. Fixed for the lifetime of a deployment.
    pub total_buckets: u32,

    /// Number of nodes active at startup.
    pub initial_nodes: u32,

    /// Bucket assignment policy.
    pub placement: PlacementStrategy,

    /// Seed for the key hash. Changing it re-buckets every key.
    pub hash_seed: u64,

    /// Prefix of each shard's database name.
    pub database_prefix: String,

    /// Reserved collection that keeps a shard database alive.
    /// It is never migrated and never dropped by `DropAll`.
    pub placeholder_collection: Option<String>,

    /// Migration configuration.
    pub migration: MigrationConfig,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            total_buckets: DEFAULT_TOTAL_BUCKETS,
            initial_nodes: 1,
            placement: PlacementStrategy::Balanced,
            hash_seed: 0,
            database_prefix: "realtime_".to_string(),
            placeholder_collection: Some("dummy".to_string()),
            migration: MigrationConfig::default(),
        }
    }
}

impl ShardConfig {
    /// Create a new configuration with the given bucket count and initial node count.
    pub fn new(total_buckets: u32, initial_nodes: u32) -> Self {
        Self {
            total_buckets,
            initial_nodes,
            ..Default::default()
        }
    }

    /// Set the placement strategy.
    pub fn with_placement(mut self, placement: PlacementStrategy) -> Self {
        self.placement = placement;
        self
    }

    /// Use the virtual node ring with the given vnode count.
    pub fn with_virtual_nodes(mut self, vnodes_per_node: usize) -> Self {
        self.placement = PlacementStrategy::VirtualNodes { vnodes_per_node };
        self
    }

    /// Set the key hash seed.
    pub fn with_hash_seed(mut self, seed: u64) -> Self {
        self.hash_seed = seed;
        self
    }

    /// Set the database name prefix.
    pub fn with_database_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.database_prefix = prefix.into();
        self
    }

    /// Set or clear the placeholder collection.
    pub fn with_placeholder_collection(mut self, name: Option<String>) -> Self {
        self.placeholder_collection = name;
        self
    }

    /// Set migration configuration.
    pub fn with_migration_config(mut self, migration: MigrationConfig) -> Self {
        self.migration = migration;
        self
    }

    /// Database name of a node's shard.
    pub fn database_name(&self, node: NodeId) -> String {
        format!("{}{}", self.database_prefix, node)
    }

    /// Whether a collection is the reserved placeholder.
    pub fn is_placeholder(&self, collection: &str) -> bool {
        self.placeholder_collection.as_deref() == Some(collection)
    }

    /// Check the configuration for values the router cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.total_buckets == 0 {
            return Err(Error::Config("total_buckets must be greater than zero".to_string()));
        }
        if let PlacementStrategy::VirtualNodes { vnodes_per_node } = self.placement {
            if vnodes_per_node == 0 {
                return Err(Error::Config("vnodes_per_node must be greater than zero".to_string()));
            }
        }
        self.migration.validate()
    }
}

/// Migration configuration.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Upper bound for each list/copy/count/drop call against the store.
    pub step_timeout: Duration,

    /// Maximum number of buckets migrated concurrently.
    pub max_concurrent_buckets: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(30),
            max_concurrent_buckets: 4,
        }
    }
}

impl MigrationConfig {
    /// Set the per-step timeout.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Set bucket concurrency.
    pub fn with_max_concurrent_buckets(mut self, n: usize) -> Self {
        self.max_concurrent_buckets = n;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.step_timeout.is_zero() {
            return Err(Error::Config("step_timeout must be non-zero".to_string()));
        }
        if self.max_concurrent_buckets == 0 {
            return Err(Error::Config(
                "max_concurrent_buckets must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
