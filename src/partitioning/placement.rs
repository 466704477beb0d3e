//! Immutable bucket ownership tables.
//!
//! A [`BucketMap`] is a snapshot of the ring: a total function from every
//! bucket to exactly one active node. It is rebuilt, never mutated, when the
//! node count changes.

use super::hashring::{self, HashRing};
use crate::config::{PlacementStrategy, ShardConfig};
use crate::error::{Error, Result};
use crate::rebalancing::BucketMove;
use crate::types::{BucketId, NodeId};
use std::collections::BTreeMap;

/// Bucket to node ownership for one topology.
#[derive(Debug, Clone)]
pub struct BucketMap {
    /// Ownership version, bumped on every rebuild.
    version: u64,

    /// Size of the bucket space.
    total_buckets: u32,

    /// Seed for key hashing.
    seed: u64,

    /// Assignment policy used by `rebuild`.
    strategy: PlacementStrategy,

    /// Owner of each bucket, indexed by bucket id. Empty when there are no nodes.
    owners: Vec<NodeId>,

    /// Number of active nodes (ids `0..node_count`).
    node_count: u32,

    /// Buckets whose data still sits on a node other than the owner.
    holders: BTreeMap<BucketId, NodeId>,
}

impl BucketMap {
    /// Build the table for `node_count` nodes.
    pub fn build(
        total_buckets: u32,
        node_count: u32,
        strategy: PlacementStrategy,
        seed: u64,
    ) -> Self {
        let owners = if node_count == 0 {
            Vec::new()
        } else {
            match strategy {
                PlacementStrategy::Balanced => balanced_owners(total_buckets, node_count),
                PlacementStrategy::VirtualNodes { vnodes_per_node } => {
                    ring_owners(total_buckets, node_count, vnodes_per_node, seed)
                }
            }
        };

        Self {
            version: 1,
            total_buckets,
            seed,
            strategy,
            owners,
            node_count,
            holders: BTreeMap::new(),
        }
    }

    /// Build the initial table from configuration.
    pub fn from_config(config: &ShardConfig) -> Self {
        Self::build(
            config.total_buckets,
            config.initial_nodes,
            config.placement,
            config.hash_seed,
        )
    }

    /// Recompute the full assignment for a new node count.
    pub fn rebuild(&self, node_count: u32) -> Self {
        let mut next = Self::build(self.total_buckets, node_count, self.strategy, self.seed);
        next.version = self.version + 1;
        next
    }

    /// Copy of this table that records where unmigrated buckets still live.
    ///
    /// Ownership is unchanged, so the version is kept.
    pub(crate) fn with_holders(&self, holders: BTreeMap<BucketId, NodeId>) -> Self {
        let mut next = self.clone();
        next.holders = holders;
        next
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn total_buckets(&self) -> u32 {
        self.total_buckets
    }

    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    /// Active node ids in order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> {
        0..self.node_count
    }

    /// Whether any bucket has an owner.
    pub fn is_initialized(&self) -> bool {
        !self.owners.is_empty()
    }

    /// Map a key to its bucket.
    pub fn bucket_of(&self, key: &str) -> Result<BucketId> {
        hashring::bucket_of(key, self.total_buckets, self.seed)
    }

    /// Owner of a bucket.
    pub fn owner_of(&self, bucket: BucketId) -> Result<NodeId> {
        if bucket >= self.total_buckets {
            return Err(Error::BucketOutOfRange {
                bucket,
                total: self.total_buckets,
            });
        }
        self.owners
            .get(bucket as usize)
            .copied()
            .ok_or(Error::RingUninitialized)
    }

    /// Owner of the bucket a key hashes to.
    pub fn get_node(&self, key: &str) -> Result<NodeId> {
        let bucket = self.bucket_of(key)?;
        self.owner_of(bucket)
    }

    /// Node physically holding a bucket's data.
    ///
    /// Same as the owner unless the bucket's migration is outstanding.
    pub fn holder_of(&self, bucket: BucketId) -> Result<NodeId> {
        let owner = self.owner_of(bucket)?;
        Ok(self.holders.get(&bucket).copied().unwrap_or(owner))
    }

    /// Buckets whose data has not reached their owner yet.
    pub fn pending_holders(&self) -> &BTreeMap<BucketId, NodeId> {
        &self.holders
    }

    /// Buckets owned by a node, ascending.
    pub fn buckets_of(&self, node: NodeId) -> Vec<BucketId> {
        self.owners
            .iter()
            .enumerate()
            .filter(|(_, &owner)| owner == node)
            .map(|(bucket, _)| bucket as BucketId)
            .collect()
    }

    /// Number of buckets owned by each active node.
    pub fn distribution(&self) -> BTreeMap<NodeId, usize> {
        let mut distribution: BTreeMap<NodeId, usize> = self.nodes().map(|n| (n, 0)).collect();
        for &owner in &self.owners {
            *distribution.entry(owner).or_insert(0) += 1;
        }
        distribution
    }

    /// Buckets whose owner differs between `self` and `next`.
    ///
    /// Buckets without an owner on either side have nowhere to move from or to
    /// and are left out.
    pub fn moves_to(&self, next: &BucketMap) -> Vec<BucketMove> {
        self.owners
            .iter()
            .zip(next.owners.iter())
            .enumerate()
            .filter(|(_, (from, to))| from != to)
            .map(|(bucket, (&from, &to))| BucketMove::new(bucket as BucketId, from, to))
            .collect()
    }
}

/// Incremental balanced assignment.
///
/// Starts with node 0 owning everything; node `k` then takes `total / (k + 1)`
/// buckets, one at a time, from the node currently owning the most (lowest id
/// on ties), highest bucket id first.
fn balanced_owners(total_buckets: u32, node_count: u32) -> Vec<NodeId> {
    let mut owned: Vec<Vec<BucketId>> = vec![(0..total_buckets).collect()];

    for new_node in 1..node_count {
        let quota = (total_buckets / (new_node + 1)) as usize;
        let mut taken = Vec::with_capacity(quota);

        while taken.len() < quota {
            let donor = (0..owned.len())
                .max_by(|&a, &b| owned[a].len().cmp(&owned[b].len()).then(b.cmp(&a)))
                .unwrap_or(0);
            match owned[donor].pop() {
                Some(bucket) => taken.push(bucket),
                None => break,
            }
        }

        taken.sort_unstable();
        owned.push(taken);
    }

    let mut owners = vec![0; total_buckets as usize];
    for (node, buckets) in owned.iter().enumerate() {
        for &bucket in buckets {
            owners[bucket as usize] = node as NodeId;
        }
    }
    owners
}

fn ring_owners(total_buckets: u32, node_count: u32, vnodes_per_node: usize, seed: u64) -> Vec<NodeId> {
    let mut ring = HashRing::with_vnodes(vnodes_per_node, seed);
    for node in 0..node_count {
        ring.add_node(node);
    }
    (0..total_buckets)
        .map(|bucket| ring.owner_of_bucket(bucket).unwrap_or(0))
        .collect()
}
