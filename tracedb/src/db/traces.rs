//! Trace database: execution traces keyed by a monotonically assigned id.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::db::{DatabaseError, open_tree};
use crate::records::{FUNCTION_WIDTH, NewTrace, TraceEntry, truncate_to_width};
use crate::storage::btree::{BTree, TreeStats};
use crate::storage::{PageFile, Storage};
use crate::time::{SystemTimeSource, TimeSource};

/// Conditions a trace must meet to be returned by `TraceDatabase::query`.
///
/// Ranges are inclusive. An unset range matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceFilter {
    pub duration_ms: Option<RangeInclusive<u64>>,
    pub ram_bytes: Option<RangeInclusive<u64>>,
}

impl TraceFilter {
    /// Match traces whose duration lies in `range`.
    #[must_use]
    pub fn duration(mut self, range: RangeInclusive<u64>) -> Self {
        self.duration_ms = Some(range);
        self
    }

    /// Match traces whose memory footprint lies in `range`.
    #[must_use]
    pub fn ram(mut self, range: RangeInclusive<u64>) -> Self {
        self.ram_bytes = Some(range);
        self
    }

    /// Check whether `entry` meets every set condition.
    #[must_use]
    pub fn matches(&self, entry: &TraceEntry) -> bool {
        self.duration_ms
            .as_ref()
            .is_none_or(|r| r.contains(&entry.duration_ms))
            && self
                .ram_bytes
                .as_ref()
                .is_none_or(|r| r.contains(&entry.ram_bytes))
    }
}

/// Field a `TraceQuery` orders its results by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Id,
    Duration,
    Ram,
    Function,
}

impl SortKey {
    fn compare(self, a: &TraceEntry, b: &TraceEntry) -> Ordering {
        match self {
            Self::Id => a.id.cmp(&b.id),
            Self::Duration => a.duration_ms.cmp(&b.duration_ms),
            Self::Ram => a.ram_bytes.cmp(&b.ram_bytes),
            Self::Function => a.function.cmp(&b.function),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// A filtered, sorted and paginated read of one project's traces.
///
/// Traces that compare equal on the sort key stay in id order. `offset`
/// rows are skipped after sorting, then at most `limit` are returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceQuery {
    pub filter: TraceFilter,
    pub sort: SortKey,
    pub order: SortOrder,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl TraceQuery {
    #[must_use]
    pub fn filter(mut self, filter: TraceFilter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub const fn sort_by(mut self, sort: SortKey, order: SortOrder) -> Self {
        self.sort = sort;
        self.order = order;
        self
    }

    #[must_use]
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// What `TraceDatabase::stats` groups traces by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GroupBy {
    #[default]
    Function,
    AppVersion,
}

/// Aggregates over one group of traces. Averages are rounded down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceStats {
    pub group: String,
    pub count: u64,
    pub avg_duration_ms: u64,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    pub avg_ram_bytes: u64,
    pub max_ram_bytes: u64,
}

impl std::fmt::Display for TraceStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} | {} traces | avg {} ms (min {}, max {}) | RAM avg {} max {}",
            self.group,
            self.count,
            self.avg_duration_ms,
            self.min_duration_ms,
            self.max_duration_ms,
            self.avg_ram_bytes,
            self.max_ram_bytes
        )
    }
}

#[derive(Default)]
struct StatsAccumulator {
    count: u64,
    total_duration: u128,
    min_duration: Option<u64>,
    max_duration: u64,
    total_ram: u128,
    max_ram: u64,
}

impl StatsAccumulator {
    fn add(&mut self, entry: &TraceEntry) {
        self.count += 1;
        self.total_duration += u128::from(entry.duration_ms);
        self.min_duration = Some(self.min_duration.map_or(entry.duration_ms, |m| m.min(entry.duration_ms)));
        self.max_duration = self.max_duration.max(entry.duration_ms);
        self.total_ram += u128::from(entry.ram_bytes);
        self.max_ram = self.max_ram.max(entry.ram_bytes);
    }

    fn finish(self, group: String) -> TraceStats {
        let average = |total: u128| u64::try_from(total / u128::from(self.count.max(1))).unwrap_or(u64::MAX);
        TraceStats {
            group,
            count: self.count,
            avg_duration_ms: average(self.total_duration),
            min_duration_ms: self.min_duration.unwrap_or_default(),
            max_duration_ms: self.max_duration,
            avg_ram_bytes: average(self.total_ram),
            max_ram_bytes: self.max_ram,
        }
    }
}

/// Execution traces stored in one B-tree.
pub struct TraceDatabase<S: Storage = PageFile> {
    state: Mutex<TraceState<S>>,
    clock: Box<dyn TimeSource + Send + Sync>,
}

struct TraceState<S: Storage> {
    tree: BTree<TraceEntry, S>,
    next_id: u64,
    /// Last version handed out per (project, function).
    versions: HashMap<(u32, String), u32>,
}

impl TraceDatabase {
    /// Open (or create) the trace database at `path`.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Self::open_with(PageFile::open(path)?, None, SystemTimeSource)
    }
}

impl<S: Storage> TraceDatabase<S> {
    /// Open the trace database stored in `storage`.
    ///
    /// Scans the stored traces once to rebuild the id counter and the
    /// per-function version counters.
    pub fn open_with(
        storage: S,
        max_degree: Option<usize>,
        clock: impl TimeSource + Send + Sync + 'static,
    ) -> Result<Self, DatabaseError> {
        let tree = open_tree::<TraceEntry, S>(storage, max_degree)?;

        let entries = tree.traverse_all()?;
        let next_id = entries.last().map_or(1, |e| e.id + 1);
        let mut versions: HashMap<(u32, String), u32> = HashMap::new();
        for entry in &entries {
            let version = versions
                .entry((entry.project_id, entry.function.clone()))
                .or_default();
            *version = (*version).max(entry.version);
        }

        tracing::info!(
            traces = entries.len(),
            next_id,
            degree = tree.layout().degree(),
            "Opened trace database"
        );

        Ok(Self {
            state: Mutex::new(TraceState {
                tree,
                next_id,
                versions,
            }),
            clock: Box::new(clock),
        })
    }

    /// Store a new trace and return its id.
    ///
    /// Ids increase strictly. The version is one more than the last version
    /// recorded for the same function in the same project.
    pub fn log_event(&self, trace: NewTrace) -> Result<u64, DatabaseError> {
        let mut state = self.lock()?;

        let key = (
            trace.project_id,
            truncate_to_width(&trace.function, FUNCTION_WIDTH).to_string(),
        );
        let id = state.next_id;
        let version = state.versions.get(&key).map_or(1, |last| last + 1);

        let entry = TraceEntry::from_new(id, version, self.clock.now_ms(), trace);
        tracing::debug!(id, project_id = entry.project_id, version, "Logging trace");
        state.tree.insert_or_update(entry)?;
        state.next_id = id + 1;
        state.versions.insert(key, version);

        Ok(id)
    }

    /// Look up a trace by id.
    pub fn get(&self, id: u64) -> Result<Option<TraceEntry>, DatabaseError> {
        Ok(self.lock()?.tree.search(&id)?)
    }

    /// Every trace, in id order.
    pub fn all(&self) -> Result<Vec<TraceEntry>, DatabaseError> {
        Ok(self.lock()?.tree.traverse_all()?)
    }

    /// Traces with `low <= id <= high`, in id order.
    pub fn range(&self, low: u64, high: u64) -> Result<Vec<TraceEntry>, DatabaseError> {
        Ok(self.lock()?.tree.range_search(&low, &high)?)
    }

    /// Every trace of one project, in id order.
    pub fn for_project(&self, project_id: u32) -> Result<Vec<TraceEntry>, DatabaseError> {
        self.query(project_id, &TraceFilter::default())
    }

    /// Traces of one project that match `filter`, in id order.
    pub fn query(&self, project_id: u32, filter: &TraceFilter) -> Result<Vec<TraceEntry>, DatabaseError> {
        let all = self.lock()?.tree.traverse_all()?;
        Ok(all
            .into_iter()
            .filter(|e| e.project_id == project_id && filter.matches(e))
            .collect())
    }

    /// Traces of one project that match `query.filter`, sorted and paginated.
    ///
    /// An offset past the last match yields an empty result.
    pub fn select(&self, project_id: u32, query: &TraceQuery) -> Result<Vec<TraceEntry>, DatabaseError> {
        let mut matches = self.query(project_id, &query.filter)?;
        matches.sort_by(|a, b| {
            let ordering = query.sort.compare(a, b);
            match query.order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            }
        });

        Ok(matches
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect())
    }

    /// Per-group aggregates over one project's traces, ordered by group.
    ///
    /// Traces with an empty function name or app version are left out of
    /// the grouping that uses that field.
    pub fn stats(&self, project_id: u32, group_by: GroupBy) -> Result<Vec<TraceStats>, DatabaseError> {
        let mut groups: BTreeMap<String, StatsAccumulator> = BTreeMap::new();
        for entry in self.for_project(project_id)? {
            let group = match group_by {
                GroupBy::Function => &entry.function,
                GroupBy::AppVersion => &entry.app_version,
            };
            if group.is_empty() {
                continue;
            }
            groups.entry(group.clone()).or_default().add(&entry);
        }

        Ok(groups
            .into_iter()
            .map(|(group, acc)| acc.finish(group))
            .collect())
    }

    /// Remove a trace. Returns whether it existed.
    pub fn delete(&self, id: u64) -> Result<bool, DatabaseError> {
        let removed = self.lock()?.tree.delete(&id)?;
        if removed.is_some() {
            tracing::debug!(id, "Deleted trace");
        }
        Ok(removed.is_some())
    }

    /// Remove every trace of one project. Returns how many were removed.
    pub fn delete_project(&self, project_id: u32) -> Result<usize, DatabaseError> {
        let mut state = self.lock()?;

        let ids: Vec<u64> = state
            .tree
            .traverse_all()?
            .into_iter()
            .filter(|e| e.project_id == project_id)
            .map(|e| e.id)
            .collect();

        let mut removed = 0;
        for id in ids {
            if state.tree.delete(&id)?.is_some() {
                removed += 1;
            }
        }

        tracing::info!(project_id, removed, "Deleted project traces");
        Ok(removed)
    }

    /// Number of stored traces.
    pub fn len(&self) -> Result<usize, DatabaseError> {
        Ok(self.lock()?.tree.len()?)
    }

    /// Check whether no traces are stored.
    pub fn is_empty(&self) -> Result<bool, DatabaseError> {
        Ok(self.lock()?.tree.is_empty()?)
    }

    /// Check the structure of the underlying tree.
    pub fn verify(&self) -> Result<TreeStats, DatabaseError> {
        Ok(self.lock()?.tree.verify()?)
    }

    /// Render the underlying tree for debugging.
    pub fn dump(&self) -> Result<String, DatabaseError> {
        Ok(self.lock()?.tree.dump()?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, TraceState<S>>, DatabaseError> {
        self.state.lock().map_err(|_| DatabaseError::LockPoisoned)
    }
}
