//! Entry point for the API layer: one call per routing or topology operation.
//!
//! [`ShardCoordinator`] owns the ring, the store handle and the migrator.
//! Topology changes run their migration pass before returning, so a caller
//! of `add_node` or `remove_node` gets the migration report with the result.

use crate::config::ShardConfig;
use crate::error::{Error, Result};
use crate::partitioning::{RingState, ShardRing};
use crate::rebalancing::{
    MigrationFence, MigrationPlan, MigrationReport, Migrator, RebalanceMetrics, RebalanceMetricsSnapshot,
};
use crate::store::ShardStore;
use crate::types::{BucketId, NodeId, QuoteRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of adding a node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeAdded {
    pub new_node: NodeId,
    /// Node that ceded the most buckets to the new node; `None` if nothing
    /// moved.
    pub old_node: Option<NodeId>,
    pub new_database: String,
    pub old_database: Option<String>,
    pub report: MigrationReport,
}

/// Result of removing the last node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeRemoved {
    pub node: NodeId,
    pub database: String,
    pub report: MigrationReport,
}

/// Where a symbol's data lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardLocation {
    pub bucket: BucketId,
    /// Owner under the current ring.
    pub owner: NodeId,
    /// Node physically holding the data; differs from `owner` only while the
    /// bucket's migration is outstanding.
    pub holder: NodeId,
    /// Database name of `holder`.
    pub database: String,
}

/// Storage statistics for one active node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardStats {
    pub node: NodeId,
    pub database: String,
    pub collections: Vec<String>,
    /// Documents across all collections.
    pub documents: u64,
    pub owned_buckets: usize,
}

/// Administrative command against one shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ShardCommand {
    /// Drop one collection.
    Drop { collection: String },
    /// Count documents in one collection.
    Count { collection: String },
    /// Delete a collection's records older than `before`.
    RemoveExpired {
        collection: String,
        before: DateTime<Utc>,
    },
    /// Drop every collection except the placeholder.
    DropAll,
}

/// Result of a [`ShardCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "value", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// Number of collections dropped.
    Dropped(u64),
    /// Number of documents counted.
    Counted(u64),
    /// Number of documents deleted.
    Removed(u64),
}

/// Routes symbols to shards and keeps storage in line with the ring.
#[derive(Debug)]
pub struct ShardCoordinator {
    config: ShardConfig,
    ring: Arc<ShardRing>,
    store: Arc<dyn ShardStore>,
    migrator: Migrator,
    metrics: Arc<RebalanceMetrics>,
    /// Serializes migration passes.
    migration: tokio::sync::Mutex<()>,
}

impl ShardCoordinator {
    /// Validate the config and build the ring for the initial node count.
    pub fn new(config: ShardConfig, store: Arc<dyn ShardStore>) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(RebalanceMetrics::new());
        let migrator = Migrator::new(Arc::clone(&store), config.migration.clone())
            .with_placeholder(config.placeholder_collection.clone())
            .with_metrics(Arc::clone(&metrics));
        let ring = Arc::new(ShardRing::new(&config));

        info!(
            total_buckets = config.total_buckets,
            initial_nodes = config.initial_nodes,
            placement = ?config.placement,
            "Shard coordinator created"
        );

        Ok(Self {
            config,
            ring,
            store,
            migrator,
            metrics,
            migration: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ShardConfig {
        &self.config
    }

    pub fn ring(&self) -> &Arc<ShardRing> {
        &self.ring
    }

    pub fn state(&self) -> RingState {
        self.ring.state()
    }

    pub fn metrics(&self) -> RebalanceMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Write gates and per-collection routes of outstanding migrations.
    pub fn fence(&self) -> &Arc<MigrationFence> {
        self.migrator.fence()
    }

    /// Owner of a symbol.
    pub fn get_node(&self, symbol: &str) -> Result<NodeId> {
        self.ring.get_node(symbol)
    }

    /// Bucket, owner and current holder of a symbol.
    pub fn locate(&self, symbol: &str) -> Result<ShardLocation> {
        let snapshot = self.ring.snapshot();
        let bucket = snapshot.bucket_of(symbol)?;
        let owner = snapshot.owner_of(bucket)?;
        let holder = self.migrator.fence().resolve(&snapshot, bucket, symbol)?;

        Ok(ShardLocation {
            bucket,
            owner,
            holder,
            database: self.config.database_name(holder),
        })
    }

    /// Append a node and migrate the buckets it takes over.
    ///
    /// Buckets that fail to migrate are listed in the report and leave the
    /// ring Rebalancing until [`retry_migration`](Self::retry_migration)
    /// succeeds.
    pub async fn add_node(&self) -> Result<NodeAdded> {
        let _migration = self.migration.lock().await;

        let plan = self.ring.add_node()?;
        let new_node = plan.change.node();
        let old_node = plan.primary_donor();
        let report = self.run_plan(&plan).await?;

        Ok(NodeAdded {
            new_node,
            old_node,
            new_database: self.config.database_name(new_node),
            old_database: old_node.map(|node| self.config.database_name(node)),
            report,
        })
    }

    /// Remove the highest node and migrate its buckets back.
    ///
    /// Fails with `NodeNotFound` on an empty ring, and with `WouldOrphanData`
    /// if the node is the last one and still stores collections.
    pub async fn remove_node(&self) -> Result<NodeRemoved> {
        let _migration = self.migration.lock().await;

        if self.ring.node_count() == 1 {
            self.ensure_last_node_empty(0).await?;
        }

        let plan = self.ring.remove_node()?;
        let node = plan.change.node();
        let report = self.run_plan(&plan).await?;

        Ok(NodeRemoved {
            node,
            database: self.config.database_name(node),
            report,
        })
    }

    /// Re-run migration for the buckets that failed last time.
    ///
    /// Returns an empty report when the ring is Stable.
    pub async fn retry_migration(&self) -> Result<MigrationReport> {
        let _migration = self.migration.lock().await;

        let Some(plan) = self.ring.pending_plan() else {
            debug!("Ring stable, nothing to retry");
            return Ok(MigrationReport::empty());
        };

        info!(plan_id = %plan.id, buckets = ?plan.buckets(), "Retrying failed buckets");
        let report = self.migrator.migrate_plan(&plan).await;
        self.finish(&plan, report).await
    }

    /// Route records to the nodes holding their symbols and store them.
    ///
    /// A symbol whose bucket is being migrated waits for that bucket to
    /// finish, then writes wherever the migration left the collection.
    pub async fn insert_quotes(&self, records: Vec<QuoteRecord>) -> Result<u64> {
        let mut by_symbol: BTreeMap<String, Vec<QuoteRecord>> = BTreeMap::new();
        for record in records {
            by_symbol.entry(record.symbol.clone()).or_default().push(record);
        }

        let fence = self.migrator.fence();
        let mut inserted = 0;
        for (symbol, records) in by_symbol {
            let bucket = self.ring.bucket_of(&symbol)?;
            let _gate = fence.enter(bucket).await;
            let node = fence.resolve(&self.ring.snapshot(), bucket, &symbol)?;
            inserted += self
                .bounded(self.store.insert_records(node, &symbol, records))
                .await?;
        }

        Ok(inserted)
    }

    /// Per-node collection and document counts.
    pub async fn shard_stats(&self) -> Result<Vec<ShardStats>> {
        let snapshot = self.ring.snapshot();
        let mut stats = Vec::new();

        for node in snapshot.nodes() {
            let collections = self.bounded(self.store.list_collections(node)).await?;
            let mut documents = 0;
            for collection in &collections {
                documents += self
                    .bounded(self.store.count_documents(node, collection))
                    .await?;
            }

            stats.push(ShardStats {
                node,
                database: self.config.database_name(node),
                collections,
                documents,
                owned_buckets: snapshot.buckets_of(node).len(),
            });
        }

        Ok(stats)
    }

    /// Run an administrative command on an active node.
    pub async fn execute(&self, node: NodeId, command: ShardCommand) -> Result<CommandOutcome> {
        if node >= self.ring.node_count() {
            return Err(Error::UnknownNode(node));
        }

        let outcome = match &command {
            ShardCommand::Drop { collection } => {
                self.bounded(self.store.drop_collection(node, collection))
                    .await?;
                CommandOutcome::Dropped(1)
            }
            ShardCommand::Count { collection } => {
                CommandOutcome::Counted(self.bounded(self.store.count_documents(node, collection)).await?)
            }
            ShardCommand::RemoveExpired { collection, before } => CommandOutcome::Removed(
                self.bounded(self.store.delete_before(node, collection, *before))
                    .await?,
            ),
            ShardCommand::DropAll => {
                let mut dropped = 0;
                for collection in self.bounded(self.store.list_collections(node)).await? {
                    if self.config.is_placeholder(&collection) {
                        continue;
                    }
                    self.bounded(self.store.drop_collection(node, &collection))
                        .await?;
                    dropped += 1;
                }
                CommandOutcome::Dropped(dropped)
            }
        };

        debug!(node, ?command, ?outcome, "Shard command executed");
        Ok(outcome)
    }

    /// Close the store.
    pub async fn shutdown(self) -> Result<()> {
        info!(state = %self.ring.state(), "Shutting down shard coordinator");
        self.store.close().await?;
        Ok(())
    }

    async fn run_plan(&self, plan: &MigrationPlan) -> Result<MigrationReport> {
        if plan.is_empty() {
            return Ok(MigrationReport::empty());
        }

        self.metrics.rebalances_started.inc();
        self.metrics.rebalancing.set(1);

        let report = self.migrator.migrate_plan(plan).await;
        self.finish(plan, report).await
    }

    async fn finish(&self, plan: &MigrationPlan, report: MigrationReport) -> Result<MigrationReport> {
        let state = self.ring.complete_rebalance(plan.id, &report)?;

        // The ring no longer records holders for these buckets.
        let failed = report.failed_buckets();
        let settled: Vec<BucketId> = plan
            .buckets()
            .into_iter()
            .filter(|bucket| !failed.contains(bucket))
            .collect();
        self.migrator.fence().release(&settled).await;

        match state {
            RingState::Stable => {
                self.metrics.rebalances_completed.inc();
                self.metrics.rebalancing.set(0);
            }
            RingState::Rebalancing => {
                self.metrics.rebalances_partial.inc();
                warn!(
                    plan_id = %plan.id,
                    failed_buckets = ?report.failed_buckets(),
                    "Buckets left on their previous owners, retry required"
                );
            }
        }
        Ok(report)
    }

    async fn ensure_last_node_empty(&self, node: NodeId) -> Result<()> {
        let collections = self
            .bounded(self.store.list_collections(node))
            .await?
            .into_iter()
            .filter(|collection| !self.config.is_placeholder(collection))
            .count();

        if collections > 0 {
            return Err(Error::WouldOrphanData { node, collections });
        }
        Ok(())
    }

    /// Run a store call under the migration step timeout.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, crate::error::StoreError>>,
    ) -> Result<T> {
        Ok(tokio::time::timeout(self.config.migration.step_timeout, call).await??)
    }
}
