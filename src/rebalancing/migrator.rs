//! Moves stored collections so that storage matches a new ring.
//!
//! For every affected bucket the migrator takes the bucket's gate exclusively
//! (see [`MigrationFence`]) and then:
//! 1. Lists the old owner's collections and keeps those hashing to the bucket
//! 2. Copies each collection to the new owner
//! 3. Verifies the copy by document count
//! 4. Drops the source collections once the whole bucket is verified
//!
//! A failure at any step fails that bucket only. Copies made for the failed
//! bucket are discarded and its source data is left untouched, so a later
//! pass with the same rings picks it up again. Buckets migrate concurrently
//! up to `max_concurrent_buckets`; routed writes to a bucket wait while it
//! is being migrated.

use super::fence::MigrationFence;
use super::metrics::RebalanceMetrics;
use super::plan::{BucketMove, MigrationPlan};
use super::report::{BucketFailure, FailureReason, MigrationReport, MigrationStep};
use crate::config::MigrationConfig;
use crate::error::StoreError;
use crate::partitioning::BucketMap;
use crate::store::ShardStore;
use crate::types::BucketId;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
struct BucketOutcome {
    mv: BucketMove,
    result: Result<MovedBucket, BucketFailure>,
}

#[derive(Debug, Clone, Copy)]
struct MovedBucket {
    collections: u64,
    documents: u64,
}

/// Relocates bucket data through a [`ShardStore`].
#[derive(Debug, Clone)]
pub struct Migrator {
    store: Arc<dyn ShardStore>,
    config: MigrationConfig,
    placeholder: Option<String>,
    fence: Arc<MigrationFence>,
    metrics: Arc<RebalanceMetrics>,
}

impl Migrator {
    pub fn new(store: Arc<dyn ShardStore>, config: MigrationConfig) -> Self {
        Self {
            store,
            config,
            placeholder: None,
            fence: Arc::new(MigrationFence::new()),
            metrics: Arc::new(RebalanceMetrics::new()),
        }
    }

    /// Collection that is never migrated.
    pub fn with_placeholder(mut self, placeholder: Option<String>) -> Self {
        self.placeholder = placeholder;
        self
    }

    /// Share a metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<RebalanceMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<RebalanceMetrics> {
        &self.metrics
    }

    /// Gates and routes shared with writers.
    pub fn fence(&self) -> &Arc<MigrationFence> {
        &self.fence
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Migrate every move of a plan.
    pub async fn migrate_plan(&self, plan: &MigrationPlan) -> MigrationReport {
        self.migrate(&plan.old_ring, &plan.new_ring, &plan.buckets())
            .await
    }

    /// Relocate the data of `affected` buckets from their owner in `old_ring`
    /// to their owner in `new_ring`.
    ///
    /// Buckets whose owner is the same in both rings are skipped. Running the
    /// same pass twice is a no-op the second time: the old owners no longer
    /// hold anything for the moved buckets.
    pub async fn migrate(
        &self,
        old_ring: &BucketMap,
        new_ring: &BucketMap,
        affected: &[BucketId],
    ) -> MigrationReport {
        let moves = moves_between(old_ring, new_ring, affected);
        let mut report = MigrationReport::for_buckets(moves.iter().map(|mv| mv.bucket).collect());

        if moves.is_empty() {
            debug!("No buckets to migrate");
            return report;
        }

        info!(
            report_id = %report.id,
            buckets = moves.len(),
            from_version = old_ring.version(),
            to_version = new_ring.version(),
            "Starting migration"
        );

        let timer = self.metrics.migration_duration.start_timer();
        self.run_buckets(Arc::new(new_ring.clone()), moves, &mut report)
            .await;
        report.duration_ms = timer.elapsed().as_millis() as u64;
        drop(timer);

        self.metrics
            .record_pass(report.moved.len(), report.failed.len());

        if report.is_complete() {
            info!(
                report_id = %report.id,
                buckets_moved = report.moved.len(),
                collections_moved = report.collections_moved,
                documents_moved = report.documents_moved,
                duration_ms = report.duration_ms,
                "Migration completed"
            );
        } else {
            warn!(
                report_id = %report.id,
                buckets_moved = report.moved.len(),
                failed_buckets = ?report.failed_buckets(),
                duration_ms = report.duration_ms,
                "Migration completed with failed buckets"
            );
        }

        report
    }

    async fn run_buckets(&self, ring: Arc<BucketMap>, moves: Vec<BucketMove>, report: &mut MigrationReport) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_buckets.max(1)));
        let mut outstanding: HashMap<BucketId, BucketMove> = HashMap::new();
        let mut tasks = JoinSet::new();

        for mv in moves {
            outstanding.insert(mv.bucket, mv);
            let migrator = self.clone();
            let ring = Arc::clone(&ring);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = migrator.migrate_bucket(&ring, mv).await;
                BucketOutcome { mv, result }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    outstanding.remove(&outcome.mv.bucket);
                    match outcome.result {
                        Ok(moved) => {
                            report.record_moved(outcome.mv.bucket, moved.collections, moved.documents)
                        }
                        Err(failure) => report.record_failure(failure),
                    }
                }
                Err(e) => error!(error = %e, "Bucket migration task failed"),
            }
        }

        for mv in outstanding.into_values() {
            report.record_failure(BucketFailure::new(mv, None, FailureReason::Aborted));
        }
    }

    async fn migrate_bucket(&self, ring: &BucketMap, mv: BucketMove) -> Result<MovedBucket, BucketFailure> {
        let _gate = self.fence.exclusive(mv.bucket).await;

        let collections = match self.bucket_collections(ring, mv).await {
            Ok(collections) => collections,
            Err(reason) => {
                warn!(bucket = mv.bucket, from_node = mv.from, %reason, "Cannot list source collections");
                return Err(BucketFailure::new(mv, None, reason));
            }
        };
        debug!(
            bucket = mv.bucket,
            from_node = mv.from,
            to_node = mv.to,
            collections = collections.len(),
            "Bucket enumerated"
        );

        let mut copied: Vec<&str> = Vec::with_capacity(collections.len());
        let mut documents = 0;

        for collection in &collections {
            match self.relocate_collection(mv, collection).await {
                Ok(count) => {
                    copied.push(collection.as_str());
                    documents += count;
                }
                Err(reason) => {
                    warn!(
                        bucket = mv.bucket,
                        from_node = mv.from,
                        to_node = mv.to,
                        collection = %collection,
                        %reason,
                        "Bucket migration failed, keeping source data"
                    );
                    copied.push(collection.as_str());
                    self.discard_copies(mv, &copied).await;
                    return Err(BucketFailure::new(mv, Some(collection.clone()), reason));
                }
            }
        }

        // Every copy is verified; only now may the sources go. A collection
        // routes to the new owner from just before its source is dropped.
        for collection in &collections {
            self.fence.mark_moved(mv.bucket, collection);
            let dropped = self
                .step(MigrationStep::Drop, self.store.drop_collection(mv.from, collection))
                .await;
            if let Err(reason) = dropped {
                // Collections already dropped keep routing to the new owner;
                // this one and the rest stay on the source until a retry.
                self.fence.unmark_moved(mv.bucket, collection);
                error!(
                    bucket = mv.bucket,
                    from_node = mv.from,
                    collection = %collection,
                    %reason,
                    "Failed to drop source collection"
                );
                return Err(BucketFailure::new(mv, Some(collection.clone()), reason));
            }
        }
        self.fence.seal(mv.bucket);

        debug!(
            bucket = mv.bucket,
            from_node = mv.from,
            to_node = mv.to,
            collections = collections.len(),
            documents,
            "Bucket migrated"
        );

        Ok(MovedBucket {
            collections: collections.len() as u64,
            documents,
        })
    }

    /// Collections on the bucket's source that hash to the bucket.
    async fn bucket_collections(&self, ring: &BucketMap, mv: BucketMove) -> Result<Vec<String>, FailureReason> {
        let listed = self
            .step(MigrationStep::List, self.store.list_collections(mv.from))
            .await
            .map_err(|reason| match reason {
                FailureReason::Store(msg) => FailureReason::ListFailed(msg),
                other => other,
            })?;

        Ok(listed
            .into_iter()
            .filter(|collection| !self.is_placeholder(collection))
            .filter(|collection| ring.bucket_of(collection).ok() == Some(mv.bucket))
            .collect())
    }

    /// Copy one collection and verify it. Returns the verified document count.
    async fn relocate_collection(&self, mv: BucketMove, collection: &str) -> Result<u64, FailureReason> {
        let expected = self
            .step(MigrationStep::Count, self.store.count_documents(mv.from, collection))
            .await?;
        let copied = self
            .step(
                MigrationStep::Copy,
                self.store.copy_collection(mv.from, mv.to, collection),
            )
            .await?;
        let actual = self
            .step(MigrationStep::Verify, self.store.count_documents(mv.to, collection))
            .await?;

        let found = if actual != expected { actual } else { copied };
        if found != expected {
            return Err(FailureReason::CountMismatch {
                expected,
                actual: found,
            });
        }

        self.metrics.collections_copied.inc();
        self.metrics.documents_copied.inc_by(actual);
        debug!(
            bucket = mv.bucket,
            to_node = mv.to,
            collection = %collection,
            documents = actual,
            "Collection copied and verified"
        );

        Ok(actual)
    }

    /// Best-effort removal of destination copies made for a failed bucket.
    async fn discard_copies(&self, mv: BucketMove, collections: &[&str]) {
        for collection in collections {
            let dropped = self
                .step(MigrationStep::Drop, self.store.drop_collection(mv.to, collection))
                .await;
            if let Err(reason) = dropped {
                warn!(
                    bucket = mv.bucket,
                    to_node = mv.to,
                    collection = %collection,
                    %reason,
                    "Failed to discard partial copy"
                );
            }
        }
    }

    /// Run one store call under the step timeout.
    async fn step<T>(
        &self,
        step: MigrationStep,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, FailureReason> {
        match tokio::time::timeout(self.config.step_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(FailureReason::Store(e.to_string())),
            Err(_) => {
                self.metrics.step_timeouts.inc();
                Err(FailureReason::Timeout { step })
            }
        }
    }

    fn is_placeholder(&self, collection: &str) -> bool {
        self.placeholder.as_deref() == Some(collection)
    }
}

/// Moves for the affected buckets whose owner differs between the rings.
fn moves_between(old_ring: &BucketMap, new_ring: &BucketMap, affected: &[BucketId]) -> Vec<BucketMove> {
    let affected: BTreeSet<BucketId> = affected.iter().copied().collect();
    affected
        .into_iter()
        .filter_map(|bucket| match (old_ring.owner_of(bucket), new_ring.owner_of(bucket)) {
            (Ok(from), Ok(to)) if from != to => Some(BucketMove::new(bucket, from, to)),
            (Ok(_), Ok(_)) => None,
            (from, to) => {
                warn!(
                    bucket,
                    old_owner = ?from.ok(),
                    new_owner = ?to.ok(),
                    "Skipping bucket without an owner in both rings"
                );
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlacementStrategy;
    use crate::store::MemoryStore;
    use crate::types::QuoteRecord;
    use chrono::{TimeZone, Utc};

    fn quote(symbol: &str) -> QuoteRecord {
        let ts = Utc.with_ymd_and_hms(2024, 3, 14, 15, 0, 0).unwrap();
        QuoteRecord::flat(symbol, ts, 42.0)
    }

    async fn seed(store: &MemoryStore, ring: &BucketMap, symbols: &[String]) {
        for symbol in symbols {
            let node = ring.get_node(symbol).unwrap();
            store
                .insert_records(node, symbol, vec![quote(symbol), quote(symbol)])
                .await
                .unwrap();
        }
    }

    fn symbols(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("SYM{}", i)).collect()
    }

    fn migrator(store: Arc<MemoryStore>) -> Migrator {
        Migrator::new(store, MigrationConfig::default()).with_placeholder(Some("dummy".to_string()))
    }

    #[tokio::test]
    async fn test_migrate_relocates_only_affected_collections() {
        let store = Arc::new(MemoryStore::new());
        let old = BucketMap::build(8, 2, PlacementStrategy::Balanced, 0);
        let new = old.rebuild(3);
        let symbols = symbols(40);
        seed(&store, &old, &symbols).await;

        let moves = old.moves_to(&new);
        let affected: Vec<BucketId> = moves.iter().map(|mv| mv.bucket).collect();
        let report = migrator(Arc::clone(&store)).migrate(&old, &new, &affected).await;

        assert!(report.is_complete());
        assert_eq!(report.moved, affected);
        for symbol in &symbols {
            assert_eq!(store.nodes_holding(symbol), vec![new.get_node(symbol).unwrap()]);
        }
        let expected_moved = symbols
            .iter()
            .filter(|s| affected.contains(&new.bucket_of(s).unwrap()))
            .count() as u64;
        assert_eq!(report.collections_moved, expected_moved);
        assert_eq!(report.documents_moved, expected_moved * 2);
    }

    #[tokio::test]
    async fn test_moved_buckets_are_sealed() {
        let store = Arc::new(MemoryStore::new());
        let old = BucketMap::build(8, 2, PlacementStrategy::Balanced, 0);
        let new = old.rebuild(3);
        seed(&store, &old, &symbols(40)).await;

        let affected: Vec<BucketId> = old.moves_to(&new).iter().map(|mv| mv.bucket).collect();
        let migrator = migrator(Arc::clone(&store));
        migrator.migrate(&old, &new, &affected).await;

        let fence = migrator.fence();
        assert!(affected.iter().all(|&bucket| fence.is_sealed(bucket)));
        assert_eq!(fence.routed_buckets(), affected.len());
        assert_eq!(fence.gate_count(), 0);

        fence.release(&affected).await;
        assert_eq!(fence.routed_buckets(), 0);
        assert_eq!(migrator.metrics().snapshot().migration_duration.count, 1);
    }

    #[tokio::test]
    async fn test_second_pass_moves_nothing() {
        let store = Arc::new(MemoryStore::new());
        let old = BucketMap::build(8, 2, PlacementStrategy::Balanced, 0);
        let new = old.rebuild(3);
        seed(&store, &old, &symbols(40)).await;

        let affected: Vec<BucketId> = old.moves_to(&new).iter().map(|mv| mv.bucket).collect();
        let migrator = migrator(Arc::clone(&store));
        migrator.migrate(&old, &new, &affected).await;
        let second = migrator.migrate(&old, &new, &affected).await;

        assert!(second.is_complete());
        assert_eq!(second.collections_moved, 0);
        assert_eq!(second.documents_moved, 0);
    }

    #[tokio::test]
    async fn test_placeholder_stays_put() {
        let store = Arc::new(MemoryStore::new());
        let old = BucketMap::build(8, 1, PlacementStrategy::Balanced, 0);
        let new = old.rebuild(2);
        store
            .insert_records(0, "dummy", vec![quote("dummy")])
            .await
            .unwrap();

        let all: Vec<BucketId> = (0..8).collect();
        let report = migrator(Arc::clone(&store)).migrate(&old, &new, &all).await;

        assert!(report.is_complete());
        assert_eq!(report.collections_moved, 0);
        assert_eq!(store.nodes_holding("dummy"), vec![0]);
    }

    #[tokio::test]
    async fn test_unchanged_buckets_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let old = BucketMap::build(8, 2, PlacementStrategy::Balanced, 0);
        let new = old.rebuild(3);
        let unchanged: Vec<BucketId> = (0..8)
            .filter(|&b| old.owner_of(b).unwrap() == new.owner_of(b).unwrap())
            .collect();

        let report = migrator(store).migrate(&old, &new, &unchanged).await;
        assert!(report.planned.is_empty());
        assert!(report.moved.is_empty());
    }

    #[tokio::test]
    async fn test_list_failure_fails_source_buckets() {
        let store = Arc::new(MemoryStore::new());
        let old = BucketMap::build(8, 2, PlacementStrategy::Balanced, 0);
        let new = old.rebuild(3);
        seed(&store, &old, &symbols(10)).await;
        store.close().await.unwrap();

        let affected: Vec<BucketId> = old.moves_to(&new).iter().map(|mv| mv.bucket).collect();
        let report = migrator(store).migrate(&old, &new, &affected).await;

        assert_eq!(report.failed_buckets(), affected);
        assert!(report
            .failed
            .iter()
            .all(|f| matches!(f.reason, FailureReason::ListFailed(_))));
    }

    #[test]
    fn test_moves_between_dedups_and_filters() {
        let old = BucketMap::build(8, 2, PlacementStrategy::Balanced, 0);
        let new = old.rebuild(3);
        let moves = moves_between(&old, &new, &[7, 3, 3, 0, 42]);
        assert_eq!(moves, vec![BucketMove::new(3, 0, 2), BucketMove::new(7, 1, 2)]);
    }
}
