//! Core types used throughout the routing core.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shard identifier: the node's index in the ordered set of active shards.
pub type NodeId = u32;

/// Slot in the fixed bucket address space `[0, total_buckets)`.
pub type BucketId = u32;

/// A single real-time quote stored in a symbol's collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRecord {
    /// Trading symbol; also the name of the collection holding the record.
    pub symbol: String,
    /// When the quote was sampled.
    pub timestamp: DateTime<Utc>,
    pub current_price: f64,
    pub change: f64,
    pub percent_change: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub open_price: f64,
    pub prev_close_price: f64,
}

impl QuoteRecord {
    /// Create a record where every price field equals `price` and change is zero.
    pub fn flat(symbol: impl Into<String>, timestamp: DateTime<Utc>, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            current_price: price,
            change: 0.0,
            percent_change: 0.0,
            high_price: price,
            low_price: price,
            open_price: price,
            prev_close_price: price,
        }
    }

    /// Document id in the `"{symbol}_{timestamp}"` form.
    pub fn id(&self) -> String {
        format!("{}_{}", self.symbol, self.timestamp.format("%Y-%m-%d %H:%M:%S%.6f"))
    }

    /// Validate the record before it is written into `collection`.
    pub fn validate(&self, collection: &str) -> Result<(), StoreError> {
        if self.symbol.is_empty() {
            return Err(StoreError::InvalidRecord("empty symbol".to_string()));
        }
        if self.symbol != collection {
            return Err(StoreError::InvalidRecord(format!(
                "record for {} written to collection {}",
                self.symbol, collection
            )));
        }

        let prices = [
            ("current_price", self.current_price),
            ("high_price", self.high_price),
            ("low_price", self.low_price),
            ("open_price", self.open_price),
            ("prev_close_price", self.prev_close_price),
        ];
        for (field, value) in prices {
            if !value.is_finite() || value < 0.0 {
                return Err(StoreError::InvalidRecord(format!(
                    "{} must be a non-negative number, got {}",
                    field, value
                )));
            }
        }

        if !self.change.is_finite() || !self.percent_change.is_finite() {
            return Err(StoreError::InvalidRecord("change fields must be finite".to_string()));
        }

        Ok(())
    }
}
