//! Ordered registry of active shard nodes.
//!
//! Node ids are positions in the registry: a new node gets id `count` and only
//! the highest id can be removed. The registry is owned by
//! [`ShardRing`](super::ShardRing) and only touched under its mutation lock.

use crate::error::{Error, Result};
use crate::types::NodeId;

/// Tracks the active shard ids `0..count`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeRegistry {
    count: u32,
}

impl NodeRegistry {
    /// Create a registry with `count` nodes already active.
    pub fn new(count: u32) -> Self {
        Self { count }
    }

    /// Number of active nodes.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Active node ids in order.
    pub fn active_ids(&self) -> Vec<NodeId> {
        (0..self.count).collect()
    }

    /// Check whether `node` is active.
    pub fn contains(&self, node: NodeId) -> bool {
        node < self.count
    }

    /// Append a node and return its id.
    pub fn append(&mut self) -> NodeId {
        let id = self.count;
        self.count += 1;
        id
    }

    /// Remove the most recently added node and return its id.
    pub fn remove_last(&mut self) -> Result<NodeId> {
        if self.count == 0 {
            return Err(Error::NodeNotFound);
        }
        self.count -= 1;
        Ok(self.count)
    }

    /// Highest active id, if any.
    pub fn last(&self) -> Option<NodeId> {
        self.count.checked_sub(1)
    }
}
