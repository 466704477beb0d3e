//! Partitioning module for routing shard keys to nodes.
//!
//! Keys hash into a fixed space of buckets; buckets are assigned to nodes.
//! The assignment guarantees:
//! - Every bucket has exactly one owner among the active nodes
//! - Adding a node only moves buckets onto the new node
//! - Removing the last node only moves that node's buckets
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ShardRing                            │
//! │  ┌──────────────┐   ┌────────────────────────────────────┐  │
//! │  │ NodeRegistry │   │ Arc<BucketMap>  (swapped on change)│  │
//! │  │  0, 1, 2     │   │  b0→0 b1→0 b2→2 b3→0 b4→1 ...      │  │
//! │  └──────────────┘   └────────────────────────────────────┘  │
//! │                                                             │
//! │  "AAPL" → xxhash64 % TOTAL_BUCKET → b4 → node 1             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use quoteshard::config::ShardConfig;
//! use quoteshard::partitioning::ShardRing;
//!
//! let ring = ShardRing::new(&ShardConfig::new(8, 2));
//! let node = ring.get_node("AAPL").unwrap();
//! assert!(node < 2);
//!
//! let plan = ring.add_node().unwrap();
//! assert!(plan.moves.iter().all(|mv| mv.to == 2));
//! ```

mod hashring;
mod placement;
mod registry;
mod ring;

pub use hashring::{bucket_of, hash_bytes, HashRing, DEFAULT_VNODES_PER_NODE};
pub use placement::BucketMap;
pub use registry::NodeRegistry;
pub use ring::{RingState, ShardRing};
