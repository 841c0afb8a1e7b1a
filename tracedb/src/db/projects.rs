//! Project database: projects keyed by id, each with its own API key and
//! speed thresholds.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rand::Rng;

use crate::db::{DatabaseError, open_tree};
use crate::records::{PROJECT_NAME_WIDTH, ProjectEntry, truncate_to_width};
use crate::storage::btree::{BTree, TreeStats};
use crate::storage::{PageFile, Storage};
use crate::time::{SystemTimeSource, TimeSource};

/// Prefix of every generated API key.
pub const API_KEY_PREFIX: &str = "sk_live_";

/// Projects stored in one B-tree.
pub struct ProjectDatabase<S: Storage = PageFile> {
    state: Mutex<ProjectState<S>>,
    clock: Box<dyn TimeSource + Send + Sync>,
}

struct ProjectState<S: Storage> {
    tree: BTree<ProjectEntry, S>,
    /// `None` once the id after `u32::MAX` would be needed.
    next_id: Option<u32>,
}

impl ProjectDatabase {
    /// Open (or create) the project database at `path`.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Self::open_with(PageFile::open(path)?, None, SystemTimeSource)
    }
}

impl<S: Storage> ProjectDatabase<S> {
    /// Open the project database stored in `storage`.
    pub fn open_with(
        storage: S,
        max_degree: Option<usize>,
        clock: impl TimeSource + Send + Sync + 'static,
    ) -> Result<Self, DatabaseError> {
        let tree = open_tree::<ProjectEntry, S>(storage, max_degree)?;
        let next_id = tree.last()?.map_or(Some(1), |p| p.project_id.checked_add(1));

        tracing::info!(?next_id, "Opened project database");

        Ok(Self {
            state: Mutex::new(ProjectState { tree, next_id }),
            clock: Box::new(clock),
        })
    }

    /// Create a project for `owner_id` with a fresh API key and default
    /// thresholds.
    pub fn create(&self, owner_id: u32, name: &str) -> Result<ProjectEntry, DatabaseError> {
        let mut state = self.lock()?;
        let project_id = state.next_id.ok_or(DatabaseError::IdSpaceExhausted("project"))?;

        let existing = state.tree.traverse_all()?;
        let api_key = loop {
            let candidate = generate_api_key();
            if !existing.iter().any(|p| p.api_key == candidate) {
                break candidate;
            }
        };

        let project = ProjectEntry::new(project_id, owner_id, name, &api_key, self.clock.now_ms());
        state.tree.insert_or_update(project.clone())?;
        state.next_id = project_id.checked_add(1);

        tracing::info!(project_id = project.project_id, owner_id, "Created project");
        Ok(project)
    }

    /// Look up a project by id.
    pub fn get(&self, project_id: u32) -> Result<Option<ProjectEntry>, DatabaseError> {
        Ok(self.lock()?.tree.search(&project_id)?)
    }

    /// Every project, in id order.
    pub fn all(&self) -> Result<Vec<ProjectEntry>, DatabaseError> {
        Ok(self.lock()?.tree.traverse_all()?)
    }

    /// Projects owned by `owner_id`, in id order.
    pub fn for_user(&self, owner_id: u32) -> Result<Vec<ProjectEntry>, DatabaseError> {
        let all = self.lock()?.tree.traverse_all()?;
        Ok(all.into_iter().filter(|p| p.owner_id == owner_id).collect())
    }

    /// Find the project that owns `api_key`.
    pub fn find_by_api_key(&self, api_key: &str) -> Result<Option<ProjectEntry>, DatabaseError> {
        let all = self.lock()?.tree.traverse_all()?;
        Ok(all.into_iter().find(|p| p.api_key == api_key))
    }

    /// Replace a project's speed thresholds. Returns whether the project exists.
    pub fn update_thresholds(&self, project_id: u32, fast_ms: u32, normal_ms: u32) -> Result<bool, DatabaseError> {
        if fast_ms == 0 || fast_ms >= normal_ms {
            return Err(DatabaseError::InvalidThresholds { fast_ms, normal_ms });
        }

        let mut state = self.lock()?;
        let Some(mut project) = state.tree.search(&project_id)? else {
            return Ok(false);
        };

        project.fast_ms = fast_ms;
        project.normal_ms = normal_ms;
        state.tree.insert_or_update(project)?;

        tracing::debug!(project_id, fast_ms, normal_ms, "Updated project thresholds");
        Ok(true)
    }

    /// Give a project a new name, truncated to the stored width. Returns
    /// whether the project exists.
    pub fn rename(&self, project_id: u32, name: &str) -> Result<bool, DatabaseError> {
        if name.trim().is_empty() {
            return Err(DatabaseError::EmptyName);
        }

        let mut state = self.lock()?;
        let Some(mut project) = state.tree.search(&project_id)? else {
            return Ok(false);
        };

        project.name = truncate_to_width(name, PROJECT_NAME_WIDTH).to_string();
        state.tree.insert_or_update(project)?;

        tracing::debug!(project_id, "Renamed project");
        Ok(true)
    }

    /// Remove a project. Returns whether it existed.
    ///
    /// Traces logged under the project are left alone; see
    /// `TraceDatabase::delete_project`.
    pub fn delete(&self, project_id: u32) -> Result<bool, DatabaseError> {
        let removed = self.lock()?.tree.delete(&project_id)?;
        if removed.is_some() {
            tracing::info!(project_id, "Deleted project");
        }
        Ok(removed.is_some())
    }

    /// Check the structure of the underlying tree.
    pub fn verify(&self) -> Result<TreeStats, DatabaseError> {
        Ok(self.lock()?.tree.verify()?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, ProjectState<S>>, DatabaseError> {
        self.state.lock().map_err(|_| DatabaseError::LockPoisoned)
    }
}

/// `sk_live_` followed by 32 random hex digits.
fn generate_api_key() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes
        .iter()
        .fold(String::from(API_KEY_PREFIX), |mut key, b| {
            let _ = write!(key, "{b:02x}");
            key
        })
}
