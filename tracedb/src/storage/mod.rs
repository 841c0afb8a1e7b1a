//! Page storage and the B-tree built on it.
//!
//! # File Format
//!
//! A tree lives in a single file of 4 KiB pages:
//!
//! - Page 0: the root node, always
//! - Pages 1-N: other nodes, appended as the tree grows
//!
//! There is no header, free list or checksum. Page ids are handed out by a
//! counter seeded from the file length, and pages abandoned by merges are
//! never reused.

pub mod btree;
mod file;
mod io;
mod memory;
mod page;

pub use file::PageFile;
pub use io::{Storage, StorageError};
pub use memory::{MemoryStorage, MemoryStorageStats};
pub use page::{PAGE_ID_SIZE, PAGE_SIZE, PAGE_SIZE_U64, Page, PageId, ROOT_PAGE, page_offset};
