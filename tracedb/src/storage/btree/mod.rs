//! Disk-based B-tree over fixed-layout records.
//!
//! Each node is one page. Records implement `Record`, which fixes their
//! encoded size and names the key that orders and deduplicates them.
//!
//! # Usage
//!
//! ```
//! use tracedb::storage::MemoryStorage;
//! use tracedb::storage::btree::{BTree, Record};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Counter {
//!     id: u32,
//!     hits: u32,
//! }
//!
//! impl Record for Counter {
//!     type Key = u32;
//!     const ENCODED_SIZE: usize = 8;
//!
//!     fn key(&self) -> u32 {
//!         self.id
//!     }
//!
//!     fn encode(&self, buf: &mut [u8]) {
//!         buf[..4].copy_from_slice(&self.id.to_le_bytes());
//!         buf[4..].copy_from_slice(&self.hits.to_le_bytes());
//!     }
//!
//!     fn decode(buf: &[u8]) -> Self {
//!         let word = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
//!         Self { id: word(0), hits: word(4) }
//!     }
//! }
//!
//! let mut tree = BTree::open(MemoryStorage::new())?;
//! tree.insert_or_update(Counter { id: 1, hits: 1 })?;
//! tree.insert_or_update(Counter { id: 1, hits: 2 })?;
//!
//! assert_eq!(tree.search(&1)?, Some(Counter { id: 1, hits: 2 }));
//! assert_eq!(tree.len()?, 1);
//! # Ok::<(), tracedb::storage::btree::BTreeError>(())
//! ```

mod node;
mod record;
mod tree;

pub use node::{MIN_DEGREE, NODE_HEADER_SIZE, Node, NodeError, NodeLayout};
pub use record::Record;
pub use tree::{BTree, BTreeError, TreeStats};
