//! Storage abstraction over page-addressed backing stores.
//!
//! The B-tree never touches a file directly. It talks to a `Storage`, which
//! maps page numbers to fixed-size byte regions:
//! - `PageFile` is the durable, file-backed implementation
//! - `MemoryStorage` keeps pages in memory and can inject write faults
//!
//! # Contract
//!
//! Implementations must ensure:
//! - `read_page` returns the last written content for a page, or an all-zero
//!   page if the page was never written
//! - `write_page` is durable once it returns `Ok`
//! - `allocate_page` never hands out the same page id twice and never hands
//!   out page 0, which is reserved for the tree root
//! - each call is serialized against every other call on the same instance
//!
//! No cross-page atomicity is promised. Callers that change several pages as
//! one logical step must serialize those steps themselves.

use crate::storage::page::{Page, PageId};

/// Errors that can occur during storage operations.
///
/// All of them are fatal for the tree that observed them: no write is retried
/// and no partially applied change is rolled back.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error.
    Io(std::io::Error),
    /// The store's internal lock was poisoned by a panicking thread.
    LockPoisoned,
    /// The 32-bit page id space is exhausted.
    PageIdOverflow,
    /// Injected fault for testing.
    InjectedFault(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::LockPoisoned => write!(f, "storage lock poisoned"),
            Self::PageIdOverflow => write!(f, "page id space exhausted"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Abstraction over page-based storage operations.
///
/// All methods take `&self`; implementations guard their state with a lock
/// so a store can be shared between readers.
pub trait Storage {
    /// Read a page.
    ///
    /// Pages beyond the current extent read back as all zeros.
    fn read_page(&self, page_id: PageId) -> Result<Page, StorageError>;

    /// Write a full page and make it durable before returning.
    fn write_page(&self, page_id: PageId, page: &Page) -> Result<(), StorageError>;

    /// Hand out a fresh page id.
    fn allocate_page(&self) -> Result<PageId, StorageError>;
}

impl<S: Storage + ?Sized> Storage for &S {
    fn read_page(&self, page_id: PageId) -> Result<Page, StorageError> {
        (**self).read_page(page_id)
    }

    fn write_page(&self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        (**self).write_page(page_id, page)
    }

    fn allocate_page(&self) -> Result<PageId, StorageError> {
        (**self).allocate_page()
    }
}
