//! Store adapter seam.
//!
//! The routing core never talks to a database directly. Everything it needs
//! from the per-shard document store goes through [`ShardStore`], which is
//! constructed once at startup and shared by reference with the ring's
//! coordinator and the migrator.
//!
//! Implementations must make each call atomic from the store's point of
//! view and safe to retry: copying onto an existing collection replaces it,
//! dropping a missing collection succeeds.

mod memory;

pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::types::{NodeId, QuoteRecord};
use chrono::{DateTime, Utc};

/// Per-shard document store operations used by the routing core.
#[async_trait::async_trait]
pub trait ShardStore: Send + Sync + std::fmt::Debug {
    /// Names of all collections stored on a node, sorted.
    async fn list_collections(&self, node: NodeId) -> Result<Vec<String>, StoreError>;

    /// Copy a collection in full from `src` to `dst`, replacing any existing
    /// copy on `dst`. Returns the number of documents written.
    async fn copy_collection(
        &self,
        src: NodeId,
        dst: NodeId,
        collection: &str,
    ) -> Result<u64, StoreError>;

    /// Drop a collection. Dropping a missing collection is not an error.
    async fn drop_collection(&self, node: NodeId, collection: &str) -> Result<(), StoreError>;

    /// Number of documents in a collection; zero if it does not exist.
    async fn count_documents(&self, node: NodeId, collection: &str) -> Result<u64, StoreError>;

    /// Delete every record older than `cutoff`. Returns the number deleted.
    async fn delete_before(
        &self,
        node: NodeId,
        collection: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Validate and append records to a collection, creating it if needed.
    async fn insert_records(
        &self,
        node: NodeId,
        collection: &str,
        records: Vec<QuoteRecord>,
    ) -> Result<u64, StoreError>;

    /// Release the backing connection.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
