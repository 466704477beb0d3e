//! Key hashing and the virtual node ring.
//!
//! Keys are hashed with xxHash64 and reduced modulo the bucket count. The
//! [`HashRing`] places each physical node at many virtual positions so that
//! buckets can be hashed onto nodes with minimal movement when nodes come and go.

use crate::error::{Error, Result};
use crate::types::{BucketId, NodeId};
use std::collections::BTreeMap;
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Virtual positions per node when none are configured.
pub const DEFAULT_VNODES_PER_NODE: usize = 256;

/// Hash raw bytes with xxHash64.
pub fn hash_bytes(bytes: &[u8], seed: u64) -> u64 {
    let mut hasher = XxHash64::with_seed(seed);
    hasher.write(bytes);
    hasher.finish()
}

/// Map a shard key to its bucket.
///
/// The result depends only on the key, the seed and the bucket count, never
/// on the current topology.
pub fn bucket_of(key: &str, total_buckets: u32, seed: u64) -> Result<BucketId> {
    if key.is_empty() {
        return Err(Error::InvalidKey);
    }
    if total_buckets == 0 {
        return Err(Error::Config("total_buckets must be greater than zero".to_string()));
    }
    Ok((hash_bytes(key.as_bytes(), seed) % total_buckets as u64) as BucketId)
}

/// Consistent hash ring that places buckets, not keys, on nodes.
///
/// Each node occupies `vnodes_per_node` positions. A bucket belongs to the
/// first position at or after its own hash, wrapping at the end.
#[derive(Debug, Clone)]
pub struct HashRing {
    positions: BTreeMap<u64, NodeId>,
    vnodes_per_node: usize,
    seed: u64,
    members: Vec<NodeId>,
}

impl HashRing {
    pub fn new(seed: u64) -> Self {
        Self::with_vnodes(DEFAULT_VNODES_PER_NODE, seed)
    }

    pub fn with_vnodes(vnodes_per_node: usize, seed: u64) -> Self {
        Self {
            positions: BTreeMap::new(),
            vnodes_per_node: vnodes_per_node.max(1),
            seed,
            members: Vec::new(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.members.len()
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.members.binary_search(&node).is_ok()
    }

    /// Place `node` on the ring. No-op if already present.
    ///
    /// Colliding positions go to the lower node id, so the ring does not
    /// depend on insertion order.
    pub fn add_node(&mut self, node: NodeId) {
        let Err(slot) = self.members.binary_search(&node) else {
            return;
        };
        self.members.insert(slot, node);
        self.claim_positions(node);
    }

    /// Take `node` off the ring. No-op if absent.
    pub fn remove_node(&mut self, node: NodeId) {
        let Ok(slot) = self.members.binary_search(&node) else {
            return;
        };
        self.members.remove(slot);
        self.positions.retain(|_, owner| *owner != node);

        // a survivor may have lost a collided position to the removed node
        for survivor in self.members.clone() {
            self.claim_positions(survivor);
        }
    }

    /// Node whose position follows the bucket's hash. `None` on an empty ring.
    pub fn owner_of_bucket(&self, bucket: BucketId) -> Option<NodeId> {
        let point = hash_bytes(format!("bucket:{}", bucket).as_bytes(), self.seed);
        self.positions
            .range(point..)
            .chain(self.positions.iter())
            .next()
            .map(|(_, &node)| node)
    }

    fn claim_positions(&mut self, node: NodeId) {
        for i in 0..self.vnodes_per_node {
            let position = hash_bytes(format!("{}:{}", node, i).as_bytes(), self.seed);
            self.positions
                .entry(position)
                .and_modify(|owner| *owner = (*owner).min(node))
                .or_insert(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_bucket_of_is_stable() {
        let first = bucket_of("AAPL", 64, 0).unwrap();
        for _ in 0..10 {
            assert_eq!(bucket_of("AAPL", 64, 0).unwrap(), first);
        }
        assert!(first < 64);
    }

    #[test]
    fn test_bucket_of_empty_key() {
        assert!(matches!(bucket_of("", 64, 0), Err(Error::InvalidKey)));
    }

    #[test]
    fn test_bucket_spread() {
        let mut counts = HashMap::new();
        for i in 0..8000 {
            let key = format!("SYM{}", i);
            *counts.entry(bucket_of(&key, 8, 0).unwrap()).or_insert(0usize) += 1;
        }

        // Each bucket should hold roughly 1/8 of keys
        assert_eq!(counts.len(), 8);
        for (bucket, count) in counts {
            assert!(count > 800 && count < 1200, "bucket {} has {} keys", bucket, count);
        }
    }

    #[test]
    fn test_empty_ring() {
        let ring = HashRing::new(0);
        assert_eq!(ring.node_count(), 0);
        assert!(ring.owner_of_bucket(0).is_none());
    }

    #[test]
    fn test_single_node() {
        let mut ring = HashRing::with_vnodes(16, 0);
        ring.add_node(0);

        for bucket in 0..32 {
            assert_eq!(ring.owner_of_bucket(bucket), Some(0));
        }
    }

    #[test]
    fn test_duplicate_add() {
        let mut ring = HashRing::new(0);
        ring.add_node(1);
        ring.add_node(1);

        assert_eq!(ring.node_count(), 1);
    }

    #[test]
    fn test_remove_nonexistent() {
        let mut ring = HashRing::new(0);
        ring.add_node(1);
        ring.remove_node(999);

        assert_eq!(ring.node_count(), 1);
        assert!(ring.contains_node(1));
    }

    #[test]
    fn test_adding_node_only_moves_buckets_to_it() {
        let mut ring = HashRing::with_vnodes(64, 7);
        ring.add_node(0);
        ring.add_node(1);
        let before: Vec<_> = (0..512).map(|b| ring.owner_of_bucket(b)).collect();

        ring.add_node(2);
        for (bucket, old) in before.iter().enumerate() {
            let new = ring.owner_of_bucket(bucket as BucketId);
            assert!(new == *old || new == Some(2));
        }
    }

    #[test]
    fn test_remove_restores_previous_owners() {
        let mut ring = HashRing::with_vnodes(64, 7);
        ring.add_node(0);
        ring.add_node(1);
        let before: Vec<_> = (0..512).map(|b| ring.owner_of_bucket(b)).collect();

        ring.add_node(2);
        ring.remove_node(2);
        let after: Vec<_> = (0..512).map(|b| ring.owner_of_bucket(b)).collect();
        assert_eq!(before, after);
    }
}
