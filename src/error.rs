//! Error types for shard routing and rebalancing.

use crate::types::{BucketId, NodeId};
use thiserror::Error;

/// Result type alias for routing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the routing core.
#[derive(Error, Debug)]
pub enum Error {
    /// The lookup key was empty.
    #[error("invalid key: shard keys must be non-empty")]
    InvalidKey,

    /// No nodes are configured, so no bucket has an owner.
    #[error("ring uninitialized: no active nodes")]
    RingUninitialized,

    /// Remove was requested on an empty registry.
    #[error("node not found: no node to remove")]
    NodeNotFound,

    /// A node id outside the active set was addressed.
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    /// A topology mutation was attempted while a rebalance is still pending.
    #[error("rebalance in progress")]
    RebalanceInProgress,

    /// One or more buckets failed to relocate.
    #[error("migration partially failed: {} bucket(s) not relocated: {failed:?}", failed.len())]
    MigrationPartialFailure { failed: Vec<BucketId> },

    /// Bucket id outside `[0, total_buckets)`.
    #[error("bucket {bucket} out of range (total buckets {total})")]
    BucketOutOfRange { bucket: BucketId, total: u32 },

    /// Removing the node would leave its collections without an owner.
    #[error("removing node {node} would orphan {collections} collection(s)")]
    WouldOrphanData { node: NodeId, collections: usize },

    /// A migration result was reported for a plan that is no longer pending.
    #[error("stale migration plan: {0}")]
    StalePlan(uuid::Uuid),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// A bounded store call did not finish in time.
    #[error("operation timed out")]
    Timeout,

    /// Store adapter errors.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors surfaced by a [`ShardStore`](crate::store::ShardStore) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The collection does not exist on the node.
    #[error("collection {collection} not found on node {node}")]
    CollectionNotFound { node: NodeId, collection: String },

    /// A record failed validation at the store boundary.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// The node's database could not be reached.
    #[error("node {0} unavailable")]
    Unavailable(NodeId),

    /// Backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}
