//! In-memory [`ShardStore`] keeping each node's collections in a map.

use super::ShardStore;
use crate::error::StoreError;
use crate::types::{NodeId, QuoteRecord};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

type Collections = BTreeMap<String, Vec<QuoteRecord>>;

/// Shard store backed by process memory.
///
/// Node databases are created lazily on first write, like a document store
/// creating a database when the first collection appears.
#[derive(Debug, Default)]
pub struct MemoryStore {
    nodes: RwLock<HashMap<NodeId, Collections>>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Every node holding `collection`, ascending.
    pub fn nodes_holding(&self, collection: &str) -> Vec<NodeId> {
        let nodes = self.nodes.read();
        let mut holding: Vec<NodeId> = nodes
            .iter()
            .filter(|(_, collections)| collections.contains_key(collection))
            .map(|(&node, _)| node)
            .collect();
        holding.sort_unstable();
        holding
    }

    /// Clone of a collection's records.
    pub fn records(&self, node: NodeId, collection: &str) -> Option<Vec<QuoteRecord>> {
        self.nodes
            .read()
            .get(&node)
            .and_then(|collections| collections.get(collection))
            .cloned()
    }

    fn ensure_open(&self, node: NodeId) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Unavailable(node));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ShardStore for MemoryStore {
    async fn list_collections(&self, node: NodeId) -> Result<Vec<String>, StoreError> {
        self.ensure_open(node)?;
        Ok(self
            .nodes
            .read()
            .get(&node)
            .map(|collections| collections.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn copy_collection(
        &self,
        src: NodeId,
        dst: NodeId,
        collection: &str,
    ) -> Result<u64, StoreError> {
        self.ensure_open(src)?;
        let mut nodes = self.nodes.write();

        let records = nodes
            .get(&src)
            .and_then(|collections| collections.get(collection))
            .cloned()
            .ok_or_else(|| StoreError::CollectionNotFound {
                node: src,
                collection: collection.to_string(),
            })?;

        let copied = records.len() as u64;
        nodes
            .entry(dst)
            .or_default()
            .insert(collection.to_string(), records);

        Ok(copied)
    }

    async fn drop_collection(&self, node: NodeId, collection: &str) -> Result<(), StoreError> {
        self.ensure_open(node)?;
        if let Some(collections) = self.nodes.write().get_mut(&node) {
            collections.remove(collection);
        }
        Ok(())
    }

    async fn count_documents(&self, node: NodeId, collection: &str) -> Result<u64, StoreError> {
        self.ensure_open(node)?;
        Ok(self
            .nodes
            .read()
            .get(&node)
            .and_then(|collections| collections.get(collection))
            .map_or(0, |records| records.len() as u64))
    }

    async fn delete_before(
        &self,
        node: NodeId,
        collection: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.ensure_open(node)?;
        let mut nodes = self.nodes.write();
        let Some(records) = nodes
            .get_mut(&node)
            .and_then(|collections| collections.get_mut(collection))
        else {
            return Ok(0);
        };

        let before = records.len();
        records.retain(|record| record.timestamp >= cutoff);
        Ok((before - records.len()) as u64)
    }

    async fn insert_records(
        &self,
        node: NodeId,
        collection: &str,
        records: Vec<QuoteRecord>,
    ) -> Result<u64, StoreError> {
        self.ensure_open(node)?;
        for record in &records {
            record.validate(collection)?;
        }

        let inserted = records.len() as u64;
        self.nodes
            .write()
            .entry(node)
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .extend(records);

        Ok(inserted)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn quotes(symbol: &str, n: usize) -> Vec<QuoteRecord> {
        let start = Utc.with_ymd_and_hms(2024, 3, 14, 9, 30, 0).unwrap();
        (0..n)
            .map(|i| QuoteRecord::flat(symbol, start + Duration::minutes(i as i64), 100.0 + i as f64))
            .collect()
    }

    #[tokio::test]
    async fn test_insert_and_count() {
        let store = MemoryStore::new();
        assert_eq!(store.insert_records(0, "AAPL", quotes("AAPL", 3)).await.unwrap(), 3);
        assert_eq!(store.count_documents(0, "AAPL").await.unwrap(), 3);
        assert_eq!(store.count_documents(1, "AAPL").await.unwrap(), 0);
        assert_eq!(store.list_collections(0).await.unwrap(), vec!["AAPL".to_string()]);
        assert!(store.list_collections(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_rejects_invalid_record() {
        let store = MemoryStore::new();
        let err = store
            .insert_records(0, "MSFT", quotes("AAPL", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));
        assert!(store.list_collections(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_copy_replaces_destination() {
        let store = MemoryStore::new();
        store.insert_records(0, "AAPL", quotes("AAPL", 4)).await.unwrap();
        store.insert_records(1, "AAPL", quotes("AAPL", 1)).await.unwrap();

        assert_eq!(store.copy_collection(0, 1, "AAPL").await.unwrap(), 4);
        assert_eq!(store.count_documents(1, "AAPL").await.unwrap(), 4);
        // Copy again is idempotent
        assert_eq!(store.copy_collection(0, 1, "AAPL").await.unwrap(), 4);
        assert_eq!(store.count_documents(1, "AAPL").await.unwrap(), 4);
        assert_eq!(store.nodes_holding("AAPL"), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_copy_missing_collection() {
        let store = MemoryStore::new();
        let err = store.copy_collection(0, 1, "AAPL").await.unwrap_err();
        assert!(matches!(err, StoreError::CollectionNotFound { node: 0, .. }));
    }

    #[tokio::test]
    async fn test_drop_is_idempotent() {
        let store = MemoryStore::new();
        store.insert_records(0, "AAPL", quotes("AAPL", 2)).await.unwrap();
        store.drop_collection(0, "AAPL").await.unwrap();
        store.drop_collection(0, "AAPL").await.unwrap();
        store.drop_collection(9, "AAPL").await.unwrap();
        assert!(store.nodes_holding("AAPL").is_empty());
    }

    #[tokio::test]
    async fn test_delete_before() {
        let store = MemoryStore::new();
        let records = quotes("AAPL", 10);
        let cutoff = records[4].timestamp;
        store.insert_records(0, "AAPL", records).await.unwrap();

        assert_eq!(store.delete_before(0, "AAPL", cutoff).await.unwrap(), 4);
        assert_eq!(store.count_documents(0, "AAPL").await.unwrap(), 6);
        assert_eq!(store.delete_before(0, "MSFT", cutoff).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_calls() {
        let store = MemoryStore::new();
        store.close().await.unwrap();
        assert!(store.is_closed());
        assert!(matches!(
            store.list_collections(0).await,
            Err(StoreError::Unavailable(0))
        ));
    }
}
