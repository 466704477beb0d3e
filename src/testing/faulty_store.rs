//! A [`ShardStore`] wrapper that injects failures and latency.
//!
//! `FaultyStore` forwards every call to an inner store unless a fault is
//! armed for it, and counts the migration-relevant calls so tests can assert
//! exactly how much data movement happened.
//!
//! # Example
//!
//! ```rust
//! use quoteshard::store::MemoryStore;
//! use quoteshard::testing::FaultyStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let store = FaultyStore::new(Arc::new(MemoryStore::new()));
//! store.fail_copy_of("AAPL");
//! store.set_copy_delay(Some(Duration::from_millis(50)));
//! assert_eq!(store.copy_calls(), 0);
//! ```

use crate::error::StoreError;
use crate::store::ShardStore;
use crate::types::{NodeId, QuoteRecord};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct Faults {
    copy_errors: HashSet<String>,
    short_copies: HashSet<String>,
    drop_errors: HashSet<String>,
    list_errors: HashSet<NodeId>,
    copy_delay: Option<Duration>,
}

/// Store wrapper with switchable faults and call counters.
#[derive(Debug)]
pub struct FaultyStore {
    inner: Arc<dyn ShardStore>,
    faults: RwLock<Faults>,
    copies: Mutex<Vec<(NodeId, NodeId, String)>>,
    copy_calls: AtomicU64,
    drop_calls: AtomicU64,
    list_calls: AtomicU64,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn ShardStore>) -> Self {
        Self {
            inner,
            faults: RwLock::new(Faults::default()),
            copies: Mutex::new(Vec::new()),
            copy_calls: AtomicU64::new(0),
            drop_calls: AtomicU64::new(0),
            list_calls: AtomicU64::new(0),
        }
    }

    /// Make copies of `collection` fail without writing anything.
    pub fn fail_copy_of(&self, collection: &str) {
        self.faults.write().copy_errors.insert(collection.to_string());
    }

    /// Make copies of `collection` report one document fewer than written.
    pub fn short_copy_of(&self, collection: &str) {
        self.faults.write().short_copies.insert(collection.to_string());
    }

    /// Make drops of `collection` fail on every node.
    pub fn fail_drop_of(&self, collection: &str) {
        self.faults.write().drop_errors.insert(collection.to_string());
    }

    /// Make listing `node` fail.
    pub fn fail_list_on(&self, node: NodeId) {
        self.faults.write().list_errors.insert(node);
    }

    /// Delay every copy by `delay`.
    pub fn set_copy_delay(&self, delay: Option<Duration>) {
        self.faults.write().copy_delay = delay;
    }

    /// Disarm every fault.
    pub fn heal(&self) {
        *self.faults.write() = Faults::default();
    }

    pub fn copy_calls(&self) -> u64 {
        self.copy_calls.load(Ordering::SeqCst)
    }

    pub fn drop_calls(&self) -> u64 {
        self.drop_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// `(src, dst, collection)` of every copy that reached the inner store.
    pub fn copies(&self) -> Vec<(NodeId, NodeId, String)> {
        self.copies.lock().clone()
    }

    pub fn reset_counters(&self) {
        self.copy_calls.store(0, Ordering::SeqCst);
        self.drop_calls.store(0, Ordering::SeqCst);
        self.list_calls.store(0, Ordering::SeqCst);
        self.copies.lock().clear();
    }
}

#[async_trait::async_trait]
impl ShardStore for FaultyStore {
    async fn list_collections(&self, node: NodeId) -> Result<Vec<String>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.read().list_errors.contains(&node) {
            return Err(StoreError::Unavailable(node));
        }
        self.inner.list_collections(node).await
    }

    async fn copy_collection(
        &self,
        src: NodeId,
        dst: NodeId,
        collection: &str,
    ) -> Result<u64, StoreError> {
        self.copy_calls.fetch_add(1, Ordering::SeqCst);

        let (fail, short, delay) = {
            let faults = self.faults.read();
            (
                faults.copy_errors.contains(collection),
                faults.short_copies.contains(collection),
                faults.copy_delay,
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(StoreError::Backend(format!("injected copy failure for {}", collection)));
        }

        let copied = self.inner.copy_collection(src, dst, collection).await?;
        self.copies.lock().push((src, dst, collection.to_string()));

        Ok(if short { copied.saturating_sub(1) } else { copied })
    }

    async fn drop_collection(&self, node: NodeId, collection: &str) -> Result<(), StoreError> {
        self.drop_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.read().drop_errors.contains(collection) {
            return Err(StoreError::Backend(format!("injected drop failure for {}", collection)));
        }
        self.inner.drop_collection(node, collection).await
    }

    async fn count_documents(&self, node: NodeId, collection: &str) -> Result<u64, StoreError> {
        self.inner.count_documents(node, collection).await
    }

    async fn delete_before(
        &self,
        node: NodeId,
        collection: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.inner.delete_before(node, collection, cutoff).await
    }

    async fn insert_records(
        &self,
        node: NodeId,
        collection: &str,
        records: Vec<QuoteRecord>,
    ) -> Result<u64, StoreError> {
        self.inner.insert_records(node, collection, records).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    async fn seeded() -> (FaultyStore, Arc<MemoryStore>) {
        let memory = Arc::new(MemoryStore::new());
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();
        memory
            .insert_records(0, "AAPL", vec![QuoteRecord::flat("AAPL", ts, 1.0)])
            .await
            .unwrap();
        (FaultyStore::new(Arc::clone(&memory) as Arc<dyn ShardStore>), memory)
    }

    #[tokio::test]
    async fn test_passthrough_counts_calls() {
        let (store, memory) = seeded().await;
        assert_eq!(store.copy_collection(0, 1, "AAPL").await.unwrap(), 1);
        store.drop_collection(0, "AAPL").await.unwrap();
        store.list_collections(1).await.unwrap();

        assert_eq!(store.copy_calls(), 1);
        assert_eq!(store.drop_calls(), 1);
        assert_eq!(store.list_calls(), 1);
        assert_eq!(store.copies(), vec![(0, 1, "AAPL".to_string())]);
        assert_eq!(memory.nodes_holding("AAPL"), vec![1]);
    }

    #[tokio::test]
    async fn test_injected_faults_and_heal() {
        let (store, memory) = seeded().await;
        store.fail_copy_of("AAPL");
        store.fail_drop_of("AAPL");
        store.fail_list_on(0);

        assert!(store.copy_collection(0, 1, "AAPL").await.is_err());
        assert!(store.drop_collection(0, "AAPL").await.is_err());
        assert!(matches!(
            store.list_collections(0).await,
            Err(StoreError::Unavailable(0))
        ));
        assert_eq!(memory.nodes_holding("AAPL"), vec![0]);
        assert!(store.copies().is_empty());

        store.heal();
        assert_eq!(store.copy_collection(0, 1, "AAPL").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_short_copy_underreports() {
        let (store, memory) = seeded().await;
        store.short_copy_of("AAPL");

        assert_eq!(store.copy_collection(0, 1, "AAPL").await.unwrap(), 0);
        assert_eq!(memory.count_documents(1, "AAPL").await.unwrap(), 1);
    }
}
