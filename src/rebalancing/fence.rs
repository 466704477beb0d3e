//! Coordination between routed writes and bucket migration.
//!
//! Every bucket has a gate. Writers hold it shared while they resolve a
//! symbol's node and write to it; the migrator holds it exclusively while it
//! moves the bucket, so a write never lands between a copy and the drop of its
//! source.
//!
//! While a bucket is still held by its previous owner, routing is refined per
//! collection:
//! - a collection whose source was dropped resolves to the new owner
//! - a bucket the migrator finished resolves entirely to the new owner
//!
//! These routes live until [`MigrationFence::release`] runs for the bucket,
//! which the coordinator calls after the ring has published the snapshot
//! without the bucket's holder record.

use crate::error::Result;
use crate::partitioning::BucketMap;
use crate::types::{BucketId, NodeId};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

type Gate = Arc<RwLock<()>>;

#[derive(Debug, Default)]
struct BucketRoute {
    /// Every collection of the bucket reached the new owner.
    sealed: bool,
    /// Collections already dropped from the previous owner.
    moved: HashSet<String>,
}

/// Bucket gates and per-collection routes for buckets being migrated.
#[derive(Debug, Default)]
pub struct MigrationFence {
    gates: DashMap<BucketId, Gate>,
    routes: DashMap<BucketId, BucketRoute>,
}

/// Held gate for one bucket. Dropping it releases the gate and forgets the
/// gate entry once nobody else references it.
#[derive(Debug)]
pub struct GateGuard<'a, G> {
    fence: &'a MigrationFence,
    bucket: BucketId,
    _held: G,
}

pub type SharedGate<'a> = GateGuard<'a, OwnedRwLockReadGuard<()>>;
pub type ExclusiveGate<'a> = GateGuard<'a, OwnedRwLockWriteGuard<()>>;

impl<G> Drop for GateGuard<'_, G> {
    fn drop(&mut self) {
        // the map and this guard
        self.fence
            .gates
            .remove_if(&self.bucket, |_, gate| Arc::strong_count(gate) <= 2);
    }
}

impl MigrationFence {
    pub fn new() -> Self {
        Self::default()
    }

    fn gate(&self, bucket: BucketId) -> Gate {
        Arc::clone(&*self.gates.entry(bucket).or_default())
    }

    /// Enter a bucket as a writer. Waits while the bucket is being migrated.
    pub async fn enter(&self, bucket: BucketId) -> SharedGate<'_> {
        let held = self.gate(bucket).read_owned().await;
        GateGuard {
            fence: self,
            bucket,
            _held: held,
        }
    }

    /// Take a bucket exclusively for migration.
    pub async fn exclusive(&self, bucket: BucketId) -> ExclusiveGate<'_> {
        let held = self.gate(bucket).write_owned().await;
        GateGuard {
            fence: self,
            bucket,
            _held: held,
        }
    }

    /// Node currently storing `collection`, which hashes to `bucket`.
    ///
    /// The snapshot's holder, unless the collection (or its whole bucket)
    /// already reached the owner.
    pub fn resolve(&self, snapshot: &BucketMap, bucket: BucketId, collection: &str) -> Result<NodeId> {
        let owner = snapshot.owner_of(bucket)?;
        let holder = snapshot.holder_of(bucket)?;
        if holder == owner {
            return Ok(owner);
        }

        let arrived = self
            .routes
            .get(&bucket)
            .map(|route| route.sealed || route.moved.contains(collection))
            .unwrap_or(false);
        Ok(if arrived { owner } else { holder })
    }

    /// Route `collection` to its new owner. Call before dropping the source.
    pub(crate) fn mark_moved(&self, bucket: BucketId, collection: &str) {
        self.routes
            .entry(bucket)
            .or_default()
            .moved
            .insert(collection.to_string());
    }

    /// Undo [`mark_moved`](Self::mark_moved) after a failed drop.
    pub(crate) fn unmark_moved(&self, bucket: BucketId, collection: &str) {
        if let Some(mut route) = self.routes.get_mut(&bucket) {
            route.moved.remove(collection);
        }
    }

    /// Route the whole bucket, including collections created later, to its new owner.
    pub(crate) fn seal(&self, bucket: BucketId) {
        self.routes.entry(bucket).or_default().sealed = true;
    }

    pub fn is_sealed(&self, bucket: BucketId) -> bool {
        self.routes.get(&bucket).map(|route| route.sealed).unwrap_or(false)
    }

    /// Forget the routes of buckets whose holder record is gone.
    pub async fn release(&self, buckets: &[BucketId]) {
        for &bucket in buckets {
            let _gate = self.exclusive(bucket).await;
            self.routes.remove(&bucket);
        }
    }

    /// Gates currently allocated.
    pub fn gate_count(&self) -> usize {
        self.gates.len()
    }

    /// Buckets with outstanding routes.
    pub fn routed_buckets(&self) -> usize {
        self.routes.len()
    }
}
