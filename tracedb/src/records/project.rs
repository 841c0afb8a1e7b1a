//! Project records.

use crate::records::{FieldReader, FieldWriter, truncate_to_width};
use crate::storage::btree::Record;

/// Width of the project name field in bytes.
pub const PROJECT_NAME_WIDTH: usize = 128;
/// Width of the API key field in bytes.
pub const API_KEY_WIDTH: usize = 64;

/// Default upper bound, inclusive, for a `Fast` execution.
pub const DEFAULT_FAST_MS: u32 = 100;
/// Default upper bound, inclusive, for a `Normal` execution.
pub const DEFAULT_NORMAL_MS: u32 = 500;

/// Speed class of an execution relative to a project's thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Fast,
    Normal,
    Slow,
}

impl std::fmt::Display for Speed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Normal => write!(f, "normal"),
            Self::Slow => write!(f, "slow"),
        }
    }
}

/// A project owned by a user, keyed by `project_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectEntry {
    pub project_id: u32,
    pub owner_id: u32,
    pub created_at_ms: u64,
    pub fast_ms: u32,
    pub normal_ms: u32,
    pub name: String,
    pub api_key: String,
}

impl ProjectEntry {
    /// A project with default thresholds.
    ///
    /// `name` and `api_key` are cut to their field widths.
    #[must_use]
    pub fn new(project_id: u32, owner_id: u32, name: &str, api_key: &str, created_at_ms: u64) -> Self {
        Self {
            project_id,
            owner_id,
            created_at_ms,
            fast_ms: DEFAULT_FAST_MS,
            normal_ms: DEFAULT_NORMAL_MS,
            name: truncate_to_width(name, PROJECT_NAME_WIDTH).to_string(),
            api_key: truncate_to_width(api_key, API_KEY_WIDTH).to_string(),
        }
    }

    /// Classify an execution time against this project's thresholds.
    #[must_use]
    pub fn classify(&self, duration_ms: u64) -> Speed {
        if duration_ms <= u64::from(self.fast_ms) {
            Speed::Fast
        } else if duration_ms <= u64::from(self.normal_ms) {
            Speed::Normal
        } else {
            Speed::Slow
        }
    }
}

impl std::fmt::Display for ProjectEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[Project] ID: {} | Owner: {} | Name: {} | Key: {} | Thresholds: {}/{} ms",
            self.project_id, self.owner_id, self.name, self.api_key, self.fast_ms, self.normal_ms
        )
    }
}

impl Record for ProjectEntry {
    type Key = u32;

    const ENCODED_SIZE: usize = 4 + 4 + 8 + 4 + 4 + PROJECT_NAME_WIDTH + API_KEY_WIDTH;

    fn key(&self) -> u32 {
        self.project_id
    }

    fn encode(&self, buf: &mut [u8]) {
        let mut w = FieldWriter::new(buf);
        w.u32(self.project_id);
        w.u32(self.owner_id);
        w.u64(self.created_at_ms);
        w.u32(self.fast_ms);
        w.u32(self.normal_ms);
        w.str(&self.name, PROJECT_NAME_WIDTH);
        w.str(&self.api_key, API_KEY_WIDTH);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut r = FieldReader::new(buf);
        Self {
            project_id: r.u32(),
            owner_id: r.u32(),
            created_at_ms: r.u64(),
            fast_ms: r.u32(),
            normal_ms: r.u32(),
            name: r.str(PROJECT_NAME_WIDTH),
            api_key: r.str(API_KEY_WIDTH),
        }
    }
}
