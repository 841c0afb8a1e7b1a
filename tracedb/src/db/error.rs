//! Errors returned by the domain databases.

use crate::storage::StorageError;
use crate::storage::btree::BTreeError;

/// Errors that can occur during database operations.
#[derive(Debug)]
pub enum DatabaseError {
    /// B-tree error.
    Tree(BTreeError),
    /// The database lock was poisoned by a panicking thread.
    LockPoisoned,
    /// I/O error outside the page store (e.g. creating the data directory).
    Io(std::io::Error),
    /// Thresholds must satisfy `0 < fast_ms < normal_ms`.
    InvalidThresholds { fast_ms: u32, normal_ms: u32 },
    /// Project names must not be empty.
    EmptyName,
    /// Every id of the named kind has been handed out.
    IdSpaceExhausted(&'static str),
}

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tree(e) => write!(f, "tree error: {e}"),
            Self::LockPoisoned => write!(f, "database lock poisoned"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::InvalidThresholds { fast_ms, normal_ms } => write!(
                f,
                "invalid thresholds: fast {fast_ms} ms must be positive and below normal {normal_ms} ms"
            ),
            Self::EmptyName => write!(f, "project name must not be empty"),
            Self::IdSpaceExhausted(kind) => write!(f, "no {kind} ids left"),
        }
    }
}

impl std::error::Error for DatabaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Tree(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::LockPoisoned
            | Self::InvalidThresholds { .. }
            | Self::EmptyName
            | Self::IdSpaceExhausted(_) => None,
        }
    }
}

impl From<BTreeError> for DatabaseError {
    fn from(e: BTreeError) -> Self {
        Self::Tree(e)
    }
}

impl From<StorageError> for DatabaseError {
    fn from(e: StorageError) -> Self {
        Self::Tree(BTreeError::Storage(e))
    }
}

impl From<std::io::Error> for DatabaseError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
