//! The live ring: current snapshot, node registry and rebalance state.
//!
//! # Locking
//!
//! - Reads (`get_node`, `owner_of`, `snapshot`) take the `current` read lock
//!   only long enough to clone an `Arc`; all lookups then run against an
//!   immutable [`BucketMap`], so readers never see a half-built table.
//! - Topology mutations hold the `topology` mutex for their whole duration and
//!   publish a new snapshot with a single pointer swap.

use super::placement::BucketMap;
use super::registry::NodeRegistry;
use crate::config::ShardConfig;
use crate::error::{Error, Result};
use crate::rebalancing::{MigrationPlan, MigrationReport, TopologyChange};
use crate::types::{BucketId, NodeId};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Observable state of the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingState {
    /// Ownership matches physical data placement.
    Stable,
    /// A topology change was applied but its migration has not completed.
    Rebalancing,
}

impl std::fmt::Display for RingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RingState::Stable => write!(f, "stable"),
            RingState::Rebalancing => write!(f, "rebalancing"),
        }
    }
}

#[derive(Debug)]
struct Topology {
    registry: NodeRegistry,
    /// Outstanding migration, if rebalancing.
    pending: Option<MigrationPlan>,
}

/// Bucket ownership for a dynamic set of shard nodes.
#[derive(Debug)]
pub struct ShardRing {
    current: RwLock<Arc<BucketMap>>,
    topology: Mutex<Topology>,
}

impl ShardRing {
    /// Create the ring for the configured initial node count.
    pub fn new(config: &ShardConfig) -> Self {
        Self::with_map(BucketMap::from_config(config))
    }

    /// Create the ring from a prebuilt table.
    pub fn with_map(map: BucketMap) -> Self {
        let registry = NodeRegistry::new(map.node_count());
        Self {
            current: RwLock::new(Arc::new(map)),
            topology: Mutex::new(Topology {
                registry,
                pending: None,
            }),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<BucketMap> {
        self.current.read().clone()
    }

    /// Map a key to its bucket.
    pub fn bucket_of(&self, key: &str) -> Result<BucketId> {
        self.snapshot().bucket_of(key)
    }

    /// Owner of a bucket.
    pub fn owner_of(&self, bucket: BucketId) -> Result<NodeId> {
        self.snapshot().owner_of(bucket)
    }

    /// Owner of the bucket a key hashes to.
    pub fn get_node(&self, key: &str) -> Result<NodeId> {
        self.snapshot().get_node(key)
    }

    /// Number of active nodes.
    pub fn node_count(&self) -> u32 {
        self.topology.lock().registry.count()
    }

    /// Active node ids in order.
    pub fn active_ids(&self) -> Vec<NodeId> {
        self.topology.lock().registry.active_ids()
    }

    pub fn state(&self) -> RingState {
        if self.topology.lock().pending.is_some() {
            RingState::Rebalancing
        } else {
            RingState::Stable
        }
    }

    /// Outstanding migration, if the ring is rebalancing.
    pub fn pending_plan(&self) -> Option<MigrationPlan> {
        self.topology.lock().pending.clone()
    }

    /// Append a node and rebuild.
    ///
    /// The returned plan lists every bucket that moved and its previous owner.
    pub fn add_node(&self) -> Result<MigrationPlan> {
        let mut topology = self.topology.lock();
        if topology.pending.is_some() {
            return Err(Error::RebalanceInProgress);
        }

        let node = topology.registry.append();
        let plan = self.apply(&mut topology, TopologyChange::NodeAdded(node));

        info!(
            node,
            node_count = topology.registry.count(),
            moved_buckets = plan.moves.len(),
            "Node added to ring"
        );

        Ok(plan)
    }

    /// Remove the highest-indexed node and rebuild.
    pub fn remove_node(&self) -> Result<MigrationPlan> {
        let mut topology = self.topology.lock();
        if topology.pending.is_some() {
            return Err(Error::RebalanceInProgress);
        }

        let node = topology.registry.remove_last()?;
        let plan = self.apply(&mut topology, TopologyChange::NodeRemoved(node));

        info!(
            node,
            node_count = topology.registry.count(),
            moved_buckets = plan.moves.len(),
            "Node removed from ring"
        );

        Ok(plan)
    }

    /// Rebuild for the registry's new count, publish, and enter Rebalancing
    /// when anything moved.
    ///
    /// Moved buckets are published with their previous owner as holder; the
    /// holder record is dropped by `complete_rebalance` once the data is moved.
    fn apply(&self, topology: &mut Topology, change: TopologyChange) -> MigrationPlan {
        let old_ring = self.snapshot();
        let rebuilt = old_ring.rebuild(topology.registry.count());
        let holders: BTreeMap<BucketId, NodeId> = old_ring
            .moves_to(&rebuilt)
            .iter()
            .map(|mv| (mv.bucket, mv.from))
            .collect();
        let new_ring = Arc::new(rebuilt.with_holders(holders));
        let plan = MigrationPlan::between(change, old_ring, Arc::clone(&new_ring));

        *self.current.write() = new_ring;
        topology.pending = (!plan.is_empty()).then(|| plan.clone());

        plan
    }

    /// Record the outcome of migrating the pending plan.
    ///
    /// On full success the ring becomes Stable. Otherwise it stays
    /// Rebalancing with only the failed moves outstanding, and the published
    /// snapshot records where each failed bucket's data still lives.
    pub fn complete_rebalance(&self, plan_id: Uuid, report: &MigrationReport) -> Result<RingState> {
        let mut topology = self.topology.lock();
        let pending = match &topology.pending {
            Some(plan) if plan.id == plan_id => plan.clone(),
            Some(_) => return Err(Error::StalePlan(plan_id)),
            None => {
                debug!(%plan_id, "No pending rebalance to complete");
                return Ok(RingState::Stable);
            }
        };

        let failed = report.failed_buckets();
        let remaining = pending.restricted_to(&failed);
        let current = self.snapshot();

        if remaining.is_empty() {
            topology.pending = None;
            *self.current.write() = Arc::new(current.with_holders(BTreeMap::new()));
            info!(%plan_id, "Rebalance complete, ring stable");
            return Ok(RingState::Stable);
        }

        let holders: BTreeMap<BucketId, NodeId> =
            remaining.moves.iter().map(|mv| (mv.bucket, mv.from)).collect();

        *self.current.write() = Arc::new(current.with_holders(holders));
        topology.pending = Some(remaining);

        warn!(
            %plan_id,
            failed_buckets = ?failed,
            "Rebalance incomplete, failed buckets remain on their previous owners"
        );

        Ok(RingState::Rebalancing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rebalancing::{BucketFailure, FailureReason};

    fn ring(total: u32, nodes: u32) -> ShardRing {
        ShardRing::new(&ShardConfig::new(total, nodes))
    }

    #[test]
    fn test_get_node_uninitialized() {
        let ring = ring(8, 0);
        assert!(matches!(ring.get_node("AAPL"), Err(Error::RingUninitialized)));
        assert!(matches!(ring.get_node(""), Err(Error::InvalidKey)));
    }

    #[test]
    fn test_remove_from_empty_ring() {
        let ring = ring(8, 0);
        assert!(matches!(ring.remove_node(), Err(Error::NodeNotFound)));
        assert_eq!(ring.state(), RingState::Stable);
    }

    #[test]
    fn test_add_enters_rebalancing() {
        let ring = ring(8, 2);
        let plan = ring.add_node().unwrap();

        assert_eq!(plan.change, TopologyChange::NodeAdded(2));
        assert_eq!(ring.state(), RingState::Rebalancing);
        assert_eq!(ring.node_count(), 3);
        assert_eq!(ring.snapshot().version(), plan.new_ring.version());

        // data stays on the previous owners until migrated
        let snapshot = ring.snapshot();
        assert_eq!(snapshot.pending_holders().len(), plan.moves.len());
        for mv in &plan.moves {
            assert_eq!(snapshot.owner_of(mv.bucket).unwrap(), mv.to);
            assert_eq!(snapshot.holder_of(mv.bucket).unwrap(), mv.from);
        }
    }

    #[test]
    fn test_second_mutation_rejected_while_rebalancing() {
        let ring = ring(8, 2);
        ring.add_node().unwrap();

        assert!(matches!(ring.add_node(), Err(Error::RebalanceInProgress)));
        assert!(matches!(ring.remove_node(), Err(Error::RebalanceInProgress)));
        assert_eq!(ring.node_count(), 3);
    }

    #[test]
    fn test_first_node_needs_no_migration() {
        let ring = ring(8, 0);
        let plan = ring.add_node().unwrap();

        assert!(plan.is_empty());
        assert_eq!(ring.state(), RingState::Stable);
        assert_eq!(ring.get_node("AAPL").unwrap(), 0);
    }

    #[test]
    fn test_complete_success_returns_to_stable() {
        let ring = ring(8, 2);
        let plan = ring.add_node().unwrap();
        let report = MigrationReport::succeeded(&plan);

        assert_eq!(ring.complete_rebalance(plan.id, &report).unwrap(), RingState::Stable);
        assert!(ring.pending_plan().is_none());
        assert!(ring.snapshot().pending_holders().is_empty());
    }

    #[test]
    fn test_complete_with_failures_pins_holders() {
        let ring = ring(8, 2);
        let plan = ring.add_node().unwrap();
        let failed_move = plan.moves[0];

        let mut report = MigrationReport::succeeded(&plan);
        report.record_failure(BucketFailure::new(
            failed_move,
            None,
            FailureReason::Store("boom".to_string()),
        ));

        let state = ring.complete_rebalance(plan.id, &report).unwrap();
        assert_eq!(state, RingState::Rebalancing);

        let snapshot = ring.snapshot();
        assert_eq!(snapshot.owner_of(failed_move.bucket).unwrap(), failed_move.to);
        assert_eq!(snapshot.holder_of(failed_move.bucket).unwrap(), failed_move.from);
        assert_eq!(ring.pending_plan().unwrap().moves, vec![failed_move]);
    }

    #[test]
    fn test_stale_plan_rejected() {
        let ring = ring(8, 2);
        let plan = ring.add_node().unwrap();
        let report = MigrationReport::succeeded(&plan);

        assert!(matches!(
            ring.complete_rebalance(Uuid::new_v4(), &report),
            Err(Error::StalePlan(_))
        ));
        assert_eq!(ring.state(), RingState::Rebalancing);
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let ring = Arc::new(ring(64, 2));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let ring = Arc::clone(&ring);
                std::thread::spawn(move || {
                    for i in 0..2000 {
                        let map = ring.snapshot();
                        let sum: usize = map.distribution().values().sum();
                        assert_eq!(sum, 64);
                        let key = format!("SYM{}", i);
                        let node = map.get_node(&key).unwrap();
                        assert!(node < map.node_count());
                    }
                })
            })
            .collect();

        for _ in 0..20 {
            let plan = ring.add_node().unwrap();
            ring.complete_rebalance(plan.id, &MigrationReport::succeeded(&plan))
                .unwrap();
            let plan = ring.remove_node().unwrap();
            ring.complete_rebalance(plan.id, &MigrationReport::succeeded(&plan))
                .unwrap();
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
