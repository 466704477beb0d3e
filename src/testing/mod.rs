//! Testing utilities for the routing core.
//!
//! - [`FaultyStore`] wraps any [`ShardStore`](crate::store::ShardStore) and
//!   injects copy, verify, drop and listing failures or copy latency, while
//!   counting the calls a migration makes
//! - `rebalance_e2e_tests` drives whole topology changes through the
//!   coordinator against a faulty in-memory store

mod faulty_store;

pub use faulty_store::FaultyStore;
