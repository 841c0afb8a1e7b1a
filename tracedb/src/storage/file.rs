//! Page file I/O operations.
//!
//! This module handles reading and writing pages to a single backing file.
//! Page `n` lives at byte offset `n * PAGE_SIZE`.
//!
//! # Page allocation
//!
//! Page ids come from a counter that only moves forward. It is seeded when the
//! file is opened: `1` for an empty file, otherwise `file_len / PAGE_SIZE + 1`.
//! Pages are never freed or reused, so pages orphaned by merges and root
//! collapses stay in the file for its lifetime.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::storage::io::{Storage, StorageError};
use crate::storage::page::{PAGE_SIZE, PAGE_SIZE_U64, Page, PageId, page_offset};

/// A page file handle with low-level page I/O operations.
///
/// Every operation holds one internal lock for its whole duration, so reads
/// and writes never interleave at the byte level.
pub struct PageFile {
    path: PathBuf,
    state: Mutex<FileState>,
}

struct FileState {
    file: File,
    next_page_id: PageId,
}

impl PageFile {
    /// Open the page file at `path`, creating an empty one if it does not exist.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let file_len = file.metadata()?.len();
        let existing_pages = file_len / PAGE_SIZE_U64;
        let next_page_id = if file_len == 0 {
            tracing::info!("Created new page file: {}", path.display());
            1
        } else {
            tracing::info!(
                "Opened existing page file: {} ({} pages)",
                path.display(),
                existing_pages
            );
            PageId::try_from(existing_pages + 1).map_err(|_| StorageError::PageIdOverflow)?
        };

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(FileState { file, next_page_id }),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The id the next `allocate_page` call will return.
    pub fn next_page_id(&self) -> Result<PageId, StorageError> {
        Ok(self.lock()?.next_page_id)
    }

    /// Current length of the backing file in bytes.
    pub fn file_len(&self) -> Result<u64, StorageError> {
        Ok(self.lock()?.file.metadata()?.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, FileState>, StorageError> {
        self.state.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

impl Storage for PageFile {
    fn read_page(&self, page_id: PageId) -> Result<Page, StorageError> {
        let mut state = self.lock()?;
        let mut page = Page::new();

        let offset = page_offset(page_id);
        let file_len = state.file.metadata()?.len();
        if offset >= file_len {
            return Ok(page);
        }

        // A short tail (file truncated mid-page) reads as zeros past the end.
        let available = usize::try_from(file_len - offset).map_or(PAGE_SIZE, |n| n.min(PAGE_SIZE));
        state.file.seek(SeekFrom::Start(offset))?;
        state
            .file
            .read_exact(&mut page.as_bytes_mut()[..available])?;

        Ok(page)
    }

    fn write_page(&self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        let mut state = self.lock()?;

        state.file.seek(SeekFrom::Start(page_offset(page_id)))?;
        state.file.write_all(page.as_bytes())?;
        state.file.sync_data()?;

        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId, StorageError> {
        let mut state = self.lock()?;
        let page_id = state.next_page_id;
        state.next_page_id = page_id
            .checked_add(1)
            .ok_or(StorageError::PageIdOverflow)?;
        Ok(page_id)
    }
}

impl std::fmt::Debug for PageFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFile")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
