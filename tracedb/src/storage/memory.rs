//! In-memory page storage.
//!
//! Keeps pages in a map instead of a file. Useful for ephemeral trees and for
//! tests, which can also make writes fail after a fixed budget to exercise the
//! fatal I/O path.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::storage::io::{Storage, StorageError};
use crate::storage::page::{Page, PageId};

/// Statistics about storage operations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStorageStats {
    /// Number of page reads.
    pub reads: u64,
    /// Number of successful page writes.
    pub writes: u64,
    /// Number of page allocations.
    pub allocations: u64,
}

/// In-memory storage implementation.
#[derive(Debug)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

#[derive(Debug)]
struct MemoryState {
    pages: HashMap<PageId, Page>,
    next_page_id: PageId,
    /// Writes left before every further write fails. `None` = unlimited.
    write_budget: Option<u64>,
    stats: MemoryStorageStats,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                pages: HashMap::new(),
                next_page_id: 1,
                write_budget: None,
                stats: MemoryStorageStats::default(),
            }),
        }
    }

    /// Allow `writes` more successful writes; every write after that fails
    /// with `StorageError::InjectedFault`.
    pub fn fail_writes_after(&self, writes: u64) -> Result<(), StorageError> {
        self.lock()?.write_budget = Some(writes);
        Ok(())
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> Result<MemoryStorageStats, StorageError> {
        Ok(self.lock()?.stats)
    }

    /// The id the next `allocate_page` call will return.
    pub fn next_page_id(&self) -> Result<PageId, StorageError> {
        Ok(self.lock()?.next_page_id)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.state.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn read_page(&self, page_id: PageId) -> Result<Page, StorageError> {
        let mut state = self.lock()?;
        state.stats.reads += 1;
        Ok(state.pages.get(&page_id).cloned().unwrap_or_default())
    }

    fn write_page(&self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        let mut state = self.lock()?;

        if let Some(budget) = state.write_budget.as_mut() {
            if *budget == 0 {
                return Err(StorageError::InjectedFault(format!(
                    "write to page {page_id} rejected"
                )));
            }
            *budget -= 1;
        }

        state.pages.insert(page_id, page.clone());
        state.stats.writes += 1;
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId, StorageError> {
        let mut state = self.lock()?;
        let page_id = state.next_page_id;
        state.next_page_id = page_id
            .checked_add(1)
            .ok_or(StorageError::PageIdOverflow)?;
        state.stats.allocations += 1;
        Ok(page_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwritten_page_reads_zeroed() {
        let storage = MemoryStorage::new();
        assert!(storage.read_page(7).expect("read").is_zeroed());
    }

    #[test]
    fn test_write_read_and_stats() {
        let storage = MemoryStorage::new();
        let mut page = Page::new();
        page.write_u32(8, 42);

        storage.write_page(2, &page).expect("write");
        assert_eq!(storage.read_page(2).expect("read").read_u32(8), 42);

        let stats = storage.stats().expect("stats");
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.writes, 1);
    }

    #[test]
    fn test_allocation_starts_after_root() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.allocate_page().expect("alloc"), 1);
        assert_eq!(storage.allocate_page().expect("alloc"), 2);
        assert_eq!(storage.next_page_id().expect("next"), 3);
    }

    #[test]
    fn test_write_budget() {
        let storage = MemoryStorage::new();
        storage.fail_writes_after(1).expect("set budget");

        storage.write_page(0, &Page::new()).expect("first write");
        let result = storage.write_page(1, &Page::new());
        assert!(matches!(result, Err(StorageError::InjectedFault(_))));
        assert_eq!(storage.stats().expect("stats").writes, 1);
    }
}
