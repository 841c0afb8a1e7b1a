//! Domain databases, one B-tree file each.
//!
//! Each database owns its tree behind a single mutex: every operation,
//! reads included, holds the lock from start to finish. Id counters live
//! next to the tree and are rebuilt from the largest stored key on open.
//!
//! # Files
//!
//! Under the configured data directory:
//! - `traces.db`: `TraceEntry` records keyed by trace id
//! - `projects.db`: `ProjectEntry` records keyed by project id

mod error;
mod projects;
mod traces;

use crate::config::StoreConfig;
use crate::storage::btree::{BTree, BTreeError, NodeLayout, Record};
use crate::storage::{PageFile, Storage};

pub use error::DatabaseError;
pub use projects::ProjectDatabase;
pub use traces::{GroupBy, SortKey, SortOrder, TraceDatabase, TraceFilter, TraceQuery, TraceStats};

/// File name of the trace database inside the data directory.
pub const TRACES_FILE: &str = "traces.db";
/// File name of the project database inside the data directory.
pub const PROJECTS_FILE: &str = "projects.db";

/// Open both databases under `config.database_directory`, creating the
/// directory if needed.
pub fn open_databases(config: &StoreConfig) -> Result<(TraceDatabase, ProjectDatabase), DatabaseError> {
    std::fs::create_dir_all(&config.database_directory)?;

    let traces = TraceDatabase::open_with(
        PageFile::open(&config.database_directory.join(TRACES_FILE))?,
        config.max_degree,
        crate::time::SystemTimeSource,
    )?;
    let projects = ProjectDatabase::open_with(
        PageFile::open(&config.database_directory.join(PROJECTS_FILE))?,
        config.max_degree,
        crate::time::SystemTimeSource,
    )?;

    Ok((traces, projects))
}

/// Open a tree over `storage`, optionally capping its degree.
///
/// A cap above what the record's page layout allows has no effect.
fn open_tree<T: Record, S: Storage>(storage: S, max_degree: Option<usize>) -> Result<BTree<T, S>, DatabaseError> {
    let tree = match max_degree {
        Some(cap) => {
            let natural = NodeLayout::for_record::<T>().map_err(BTreeError::from)?;
            BTree::with_max_degree(storage, cap.min(natural.degree()))?
        }
        None => BTree::open(storage)?,
    };
    Ok(tree)
}
