//! Migration records produced by topology changes.

use crate::partitioning::BucketMap;
use crate::types::{BucketId, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// A bucket whose owner changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketMove {
    pub bucket: BucketId,
    /// Owner before the topology change.
    pub from: NodeId,
    /// Owner after the topology change.
    pub to: NodeId,
}

impl BucketMove {
    pub fn new(bucket: BucketId, from: NodeId, to: NodeId) -> Self {
        Self { bucket, from, to }
    }
}

/// Type of topology change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologyChange {
    /// A node was appended.
    NodeAdded(NodeId),
    /// The highest node was removed.
    NodeRemoved(NodeId),
}

impl TopologyChange {
    /// The node that was added or removed.
    pub fn node(&self) -> NodeId {
        match self {
            TopologyChange::NodeAdded(node) | TopologyChange::NodeRemoved(node) => *node,
        }
    }
}

/// Everything the migrator needs to make storage match a new ring.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    /// Identifies the rebalance; retries keep the same id.
    pub id: Uuid,

    /// What triggered the rebalance.
    pub change: TopologyChange,

    /// Ring before the change.
    pub old_ring: Arc<BucketMap>,

    /// Ring after the change.
    pub new_ring: Arc<BucketMap>,

    /// Buckets to relocate.
    pub moves: Vec<BucketMove>,
}

impl MigrationPlan {
    /// Diff two rings into a plan.
    pub fn between(change: TopologyChange, old_ring: Arc<BucketMap>, new_ring: Arc<BucketMap>) -> Self {
        let moves = old_ring.moves_to(&new_ring);
        Self {
            id: Uuid::new_v4(),
            change,
            old_ring,
            new_ring,
            moves,
        }
    }

    /// Whether there is nothing to move.
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Buckets covered by the plan.
    pub fn buckets(&self) -> Vec<BucketId> {
        self.moves.iter().map(|mv| mv.bucket).collect()
    }

    /// Node that gives up the most buckets, lowest id on ties.
    pub fn primary_donor(&self) -> Option<NodeId> {
        let mut given: BTreeMap<NodeId, usize> = BTreeMap::new();
        for mv in &self.moves {
            *given.entry(mv.from).or_insert(0) += 1;
        }
        given
            .into_iter()
            .max_by(|(a_node, a_count), (b_node, b_count)| {
                a_count.cmp(b_count).then(b_node.cmp(a_node))
            })
            .map(|(node, _)| node)
    }

    /// Same plan restricted to the given buckets.
    pub fn restricted_to(&self, buckets: &[BucketId]) -> Self {
        let keep: HashSet<BucketId> = buckets.iter().copied().collect();
        Self {
            id: self.id,
            change: self.change,
            old_ring: Arc::clone(&self.old_ring),
            new_ring: Arc::clone(&self.new_ring),
            moves: self
                .moves
                .iter()
                .filter(|mv| keep.contains(&mv.bucket))
                .copied()
                .collect(),
        }
    }
}
