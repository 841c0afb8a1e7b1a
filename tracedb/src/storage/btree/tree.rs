//! Disk-based B-tree over fixed-layout records.
//!
//! Nodes reference each other by page id only; a node is decoded when an
//! operation needs it and re-encoded before the operation returns. Nothing is
//! cached between calls.
//!
//! The root always lives on `ROOT_PAGE`:
//! - when the root fills up, its contents move to a fresh page which becomes
//!   the only child of a new, empty internal root, and that child is split
//! - when deletion leaves an internal root without entries, its only child is
//!   copied back onto `ROOT_PAGE`
//!
//! Insertion splits full nodes on the way down, so the recursive step never
//! meets a full node. Deletion tops up thin children on the way down (borrow
//! from a sibling, or merge with one), so it never removes from a node at
//! minimum occupancy.
//!
//! # Concurrency
//!
//! Structural operations touch several pages through separate storage calls.
//! They take `&mut self`, so callers sharing a tree must wrap it in a lock;
//! read operations take `&self`.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::marker::PhantomData;
use std::path::Path;

use crate::storage::btree::node::{Node, NodeError, NodeLayout};
use crate::storage::btree::record::Record;
use crate::storage::file::PageFile;
use crate::storage::io::{Storage, StorageError};
use crate::storage::page::{PageId, ROOT_PAGE};

/// A B-tree backed by a page store.
pub struct BTree<T: Record, S: Storage> {
    storage: S,
    layout: NodeLayout,
    _record: PhantomData<T>,
}

/// Shape summary returned by `BTree::verify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of levels (1 for a tree that is a single leaf).
    pub height: usize,
    /// Number of pages reachable from the root.
    pub nodes: usize,
    /// Number of records.
    pub entries: usize,
}

impl<T: Record> BTree<T, PageFile> {
    /// Open (or create) a page file at `path` and the tree stored in it.
    pub fn open_file(path: &Path) -> Result<Self, BTreeError> {
        Self::open(PageFile::open(path)?)
    }
}

impl<T: Record, S: Storage> BTree<T, S> {
    /// Open the tree stored in `storage`.
    ///
    /// An all-zero root page is initialized as an empty leaf. Fails if `T`
    /// is too large for a usable page layout.
    pub fn open(storage: S) -> Result<Self, BTreeError> {
        let layout = NodeLayout::for_record::<T>()?;
        Self::with_layout(storage, layout)
    }

    /// Like `open`, but caps the degree at `degree` instead of the largest
    /// one a page allows.
    ///
    /// A smaller fanout only changes when nodes split and merge; pages stay
    /// readable by a tree opened with any other degree.
    pub fn with_max_degree(storage: S, degree: usize) -> Result<Self, BTreeError> {
        let layout = NodeLayout::with_max_degree::<T>(degree)?;
        Self::with_layout(storage, layout)
    }

    fn with_layout(storage: S, layout: NodeLayout) -> Result<Self, BTreeError> {
        let tree = Self {
            storage,
            layout,
            _record: PhantomData,
        };

        let root = tree.storage.read_page(ROOT_PAGE)?;
        if root.is_zeroed() {
            tree.write_node(ROOT_PAGE, &Node::new_leaf())?;
            tracing::debug!("Initialized new root page");
        }

        Ok(tree)
    }

    /// The capacity constants in effect.
    #[must_use]
    pub const fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    /// Get a reference to the underlying storage.
    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Consume the tree, returning its storage.
    pub fn into_storage(self) -> S {
        self.storage
    }

    // ========== Insertion ==========

    /// Insert a record, replacing any stored record with the same key.
    ///
    /// Returns the replaced record, if any. Replacing never restructures the
    /// tree.
    pub fn insert_or_update(&mut self, entry: T) -> Result<Option<T>, BTreeError> {
        let mut root = self.read_node(ROOT_PAGE)?;

        if root.is_full(&self.layout) {
            // Fast path for an update of a key that sits in the full root.
            if let Ok(i) = root.find_index(&entry.key()) {
                let old = std::mem::replace(&mut root.entries[i], entry);
                self.write_node(ROOT_PAGE, &root)?;
                return Ok(Some(old));
            }

            let relocated = self.storage.allocate_page()?;
            self.write_node(relocated, &root)?;

            root = Node::with_only_child(relocated);
            self.write_node(ROOT_PAGE, &root)?;

            let child = self.read_node(relocated)?;
            self.split_child(ROOT_PAGE, &mut root, 0, child)?;
            tracing::debug!(relocated, "Split root page");
        }

        self.insert_non_full(root, entry)
    }

    /// Descend from a non-full node to the leaf that takes `entry`.
    fn insert_non_full(&mut self, mut node: Node<T>, entry: T) -> Result<Option<T>, BTreeError> {
        let key = entry.key();
        let mut page_id = ROOT_PAGE;

        loop {
            let mut index = match node.find_index(&key) {
                Ok(i) => {
                    let old = std::mem::replace(&mut node.entries[i], entry);
                    self.write_node(page_id, &node)?;
                    return Ok(Some(old));
                }
                Err(i) => i,
            };

            if node.is_leaf {
                node.entries.insert(index, entry);
                self.write_node(page_id, &node)?;
                return Ok(None);
            }

            let child = self.read_node(node.children[index])?;
            let child = if child.is_full(&self.layout) {
                self.split_child(page_id, &mut node, index, child)?;

                match key.cmp(&node.entries[index].key()) {
                    std::cmp::Ordering::Less => {}
                    std::cmp::Ordering::Greater => index += 1,
                    std::cmp::Ordering::Equal => {
                        // The promoted median is the record being written.
                        let old = std::mem::replace(&mut node.entries[index], entry);
                        self.write_node(page_id, &node)?;
                        return Ok(Some(old));
                    }
                }
                self.read_node(node.children[index])?
            } else {
                child
            };

            page_id = node.children[index];
            node = child;
        }
    }

    /// Split the full child at `parent.children[index]`.
    ///
    /// The upper half of the child moves to a newly allocated sibling and the
    /// median moves up into `parent`. Pages are written child, sibling,
    /// parent, so the parent never references an unwritten sibling.
    fn split_child(
        &mut self,
        parent_page: PageId,
        parent: &mut Node<T>,
        index: usize,
        mut child: Node<T>,
    ) -> Result<(), BTreeError> {
        let degree = self.layout.degree();
        let child_page = parent.children[index];
        let sibling_page = self.storage.allocate_page()?;

        let sibling = Node {
            is_leaf: child.is_leaf,
            entries: child.entries.split_off(degree),
            children: if child.is_leaf {
                Vec::new()
            } else {
                child.children.split_off(degree)
            },
        };

        let median = child
            .entries
            .pop()
            .ok_or(BTreeError::InvariantViolated {
                page_id: child_page,
                reason: "split of a node without entries".to_string(),
            })?;

        parent.entries.insert(index, median);
        parent.children.insert(index + 1, sibling_page);

        self.write_node(child_page, &child)?;
        self.write_node(sibling_page, &sibling)?;
        self.write_node(parent_page, parent)?;

        Ok(())
    }

    // ========== Lookup ==========

    /// Look up the record with `key`.
    pub fn search(&self, key: &T::Key) -> Result<Option<T>, BTreeError> {
        let mut node = self.read_node(ROOT_PAGE)?;

        loop {
            let index = match node.find_index(key) {
                Ok(i) => return Ok(Some(node.entries.swap_remove(i))),
                Err(i) => i,
            };

            if node.is_leaf {
                return Ok(None);
            }

            node = self.read_node(node.children[index])?;
        }
    }

    /// Check whether a record with `key` exists.
    pub fn contains(&self, key: &T::Key) -> Result<bool, BTreeError> {
        Ok(self.search(key)?.is_some())
    }

    /// All records with `low <= key <= high`, in ascending key order.
    pub fn range_search(&self, low: &T::Key, high: &T::Key) -> Result<Vec<T>, BTreeError> {
        let mut results = Vec::new();
        if low <= high {
            self.collect_range(ROOT_PAGE, low, high, &mut results)?;
        }
        Ok(results)
    }

    fn collect_range(
        &self,
        page_id: PageId,
        low: &T::Key,
        high: &T::Key,
        out: &mut Vec<T>,
    ) -> Result<(), BTreeError> {
        let node = self.read_node(page_id)?;

        if node.is_leaf {
            out.extend(
                node.entries
                    .into_iter()
                    .filter(|e| *low <= e.key() && e.key() <= *high),
            );
            return Ok(());
        }

        for (i, entry) in node.entries.iter().enumerate() {
            let key = entry.key();
            if *low <= key {
                self.collect_range(node.children[i], low, high, out)?;
            }
            if key > *high {
                return Ok(());
            }
            if key >= *low {
                out.push(entry.clone());
            }
        }

        // Every separator is <= high, so the last child may still hold matches.
        self.collect_range(node.children[node.entries.len()], low, high, out)
    }

    /// Every record, in ascending key order.
    pub fn traverse_all(&self) -> Result<Vec<T>, BTreeError> {
        let mut results = Vec::new();
        self.collect_all(ROOT_PAGE, &mut results)?;
        Ok(results)
    }

    fn collect_all(&self, page_id: PageId, out: &mut Vec<T>) -> Result<(), BTreeError> {
        let node = self.read_node(page_id)?;

        if node.is_leaf {
            out.extend(node.entries);
            return Ok(());
        }

        for (child, entry) in node.children.iter().zip(node.entries) {
            self.collect_all(*child, out)?;
            out.push(entry);
        }
        if let Some(&last) = node.children.last() {
            self.collect_all(last, out)?;
        }

        Ok(())
    }

    /// The record with the smallest key.
    pub fn first(&self) -> Result<Option<T>, BTreeError> {
        let mut node = self.read_node(ROOT_PAGE)?;
        while !node.is_leaf {
            node = self.read_node(node.children[0])?;
        }
        Ok(node.entries.into_iter().next())
    }

    /// The record with the largest key.
    pub fn last(&self) -> Result<Option<T>, BTreeError> {
        let mut node = self.read_node(ROOT_PAGE)?;
        while !node.is_leaf {
            node = self.read_node(node.children[node.entries.len()])?;
        }
        Ok(node.entries.pop())
    }

    /// Count the records in the tree.
    pub fn len(&self) -> Result<usize, BTreeError> {
        Ok(self.traverse_all()?.len())
    }

    /// Check whether the tree holds no records.
    pub fn is_empty(&self) -> Result<bool, BTreeError> {
        let root = self.read_node(ROOT_PAGE)?;
        Ok(root.is_leaf && root.entries.is_empty())
    }

    /// Number of levels from the root to the leaves.
    pub fn height(&self) -> Result<usize, BTreeError> {
        let mut height = 1;
        let mut node = self.read_node(ROOT_PAGE)?;
        while !node.is_leaf {
            node = self.read_node(node.children[0])?;
            height += 1;
        }
        Ok(height)
    }

    // ========== Deletion ==========

    /// Remove the record with `key`.
    ///
    /// Returns the removed record, or `None` if no record had the key.
    pub fn delete(&mut self, key: &T::Key) -> Result<Option<T>, BTreeError> {
        let removed = self.remove_from(ROOT_PAGE, key)?;

        let root = self.read_node(ROOT_PAGE)?;
        if root.entries.is_empty() && !root.is_leaf {
            let child_page = root.children[0];
            let child = self.read_node(child_page)?;
            self.write_node(ROOT_PAGE, &child)?;
            tracing::debug!(child_page, "Collapsed root into its only child");
        }

        Ok(removed)
    }

    /// Remove `key` from the subtree at `page_id`.
    ///
    /// Callers guarantee the node has more than `degree - 1` entries unless
    /// it is the root.
    fn remove_from(&mut self, page_id: PageId, key: &T::Key) -> Result<Option<T>, BTreeError> {
        let mut node = self.read_node(page_id)?;

        match node.find_index(key) {
            Ok(index) if node.is_leaf => {
                let removed = node.entries.remove(index);
                self.write_node(page_id, &node)?;
                Ok(Some(removed))
            }
            Ok(index) => self.remove_from_internal(page_id, node, index),
            Err(_) if node.is_leaf => Ok(None),
            Err(index) => {
                let was_last = index == node.entries.len();

                let child = self.read_node(node.children[index])?;
                if child.entries.len() < self.layout.degree() {
                    self.fill(page_id, &mut node, index)?;
                }

                // Filling the last child may have merged it into its left sibling.
                let target = if was_last && index > node.entries.len() {
                    node.children[index - 1]
                } else {
                    node.children[index]
                };
                self.remove_from(target, key)
            }
        }
    }

    /// Remove `node.entries[index]` from an internal node.
    fn remove_from_internal(
        &mut self,
        page_id: PageId,
        mut node: Node<T>,
        index: usize,
    ) -> Result<Option<T>, BTreeError> {
        let degree = self.layout.degree();
        let left_page = node.children[index];
        let right_page = node.children[index + 1];

        let left = self.read_node(left_page)?;
        if left.entries.len() >= degree {
            let predecessor = self.rightmost(left)?;
            let predecessor_key = predecessor.key();
            let removed = std::mem::replace(&mut node.entries[index], predecessor);
            self.write_node(page_id, &node)?;
            self.remove_from(left_page, &predecessor_key)?;
            return Ok(Some(removed));
        }

        let right = self.read_node(right_page)?;
        if right.entries.len() >= degree {
            let successor = self.leftmost(right)?;
            let successor_key = successor.key();
            let removed = std::mem::replace(&mut node.entries[index], successor);
            self.write_node(page_id, &node)?;
            self.remove_from(right_page, &successor_key)?;
            return Ok(Some(removed));
        }

        let key = node.entries[index].key();
        self.merge(page_id, &mut node, index)?;
        self.remove_from(left_page, &key)
    }

    /// In-order predecessor: the last record of the subtree rooted at `node`.
    fn rightmost(&self, mut node: Node<T>) -> Result<T, BTreeError> {
        while !node.is_leaf {
            node = self.read_node(node.children[node.entries.len()])?;
        }
        node.entries.pop().ok_or(BTreeError::InvariantViolated {
            page_id: ROOT_PAGE,
            reason: "empty leaf below an internal node".to_string(),
        })
    }

    /// In-order successor: the first record of the subtree rooted at `node`.
    fn leftmost(&self, mut node: Node<T>) -> Result<T, BTreeError> {
        while !node.is_leaf {
            node = self.read_node(node.children[0])?;
        }
        node.entries.into_iter().next().ok_or(BTreeError::InvariantViolated {
            page_id: ROOT_PAGE,
            reason: "empty leaf below an internal node".to_string(),
        })
    }

    /// Bring `parent.children[index]` up to at least `degree` entries.
    fn fill(
        &mut self,
        parent_page: PageId,
        parent: &mut Node<T>,
        index: usize,
    ) -> Result<(), BTreeError> {
        let degree = self.layout.degree();

        if index > 0 {
            let prev = self.read_node(parent.children[index - 1])?;
            if prev.entries.len() >= degree {
                return self.borrow_from_prev(parent_page, parent, index, prev);
            }
        }

        if index < parent.entries.len() {
            let next = self.read_node(parent.children[index + 1])?;
            if next.entries.len() >= degree {
                return self.borrow_from_next(parent_page, parent, index, next);
            }
        }

        if index < parent.entries.len() {
            self.merge(parent_page, parent, index)
        } else {
            self.merge(parent_page, parent, index - 1)
        }
    }

    /// Rotate the left sibling's last entry through the parent into the child.
    fn borrow_from_prev(
        &mut self,
        parent_page: PageId,
        parent: &mut Node<T>,
        index: usize,
        mut sibling: Node<T>,
    ) -> Result<(), BTreeError> {
        let child_page = parent.children[index];
        let sibling_page = parent.children[index - 1];
        let mut child = self.read_node(child_page)?;

        let from_sibling = sibling.entries.pop().ok_or(BTreeError::InvariantViolated {
            page_id: sibling_page,
            reason: "borrow from an empty sibling".to_string(),
        })?;
        let separator = std::mem::replace(&mut parent.entries[index - 1], from_sibling);
        child.entries.insert(0, separator);

        if !child.is_leaf {
            if let Some(moved) = sibling.children.pop() {
                child.children.insert(0, moved);
            }
        }

        self.write_node(child_page, &child)?;
        self.write_node(sibling_page, &sibling)?;
        self.write_node(parent_page, parent)?;
        Ok(())
    }

    /// Rotate the right sibling's first entry through the parent into the child.
    fn borrow_from_next(
        &mut self,
        parent_page: PageId,
        parent: &mut Node<T>,
        index: usize,
        mut sibling: Node<T>,
    ) -> Result<(), BTreeError> {
        let child_page = parent.children[index];
        let sibling_page = parent.children[index + 1];
        let mut child = self.read_node(child_page)?;

        if sibling.entries.is_empty() {
            return Err(BTreeError::InvariantViolated {
                page_id: sibling_page,
                reason: "borrow from an empty sibling".to_string(),
            });
        }
        let from_sibling = sibling.entries.remove(0);
        let separator = std::mem::replace(&mut parent.entries[index], from_sibling);
        child.entries.push(separator);

        if !child.is_leaf && !sibling.children.is_empty() {
            child.children.push(sibling.children.remove(0));
        }

        self.write_node(child_page, &child)?;
        self.write_node(sibling_page, &sibling)?;
        self.write_node(parent_page, parent)?;
        Ok(())
    }

    /// Fuse `parent.children[index + 1]` and the separator at
    /// `parent.entries[index]` into `parent.children[index]`.
    ///
    /// The right sibling's page is abandoned.
    fn merge(
        &mut self,
        parent_page: PageId,
        parent: &mut Node<T>,
        index: usize,
    ) -> Result<(), BTreeError> {
        let child_page = parent.children[index];
        let sibling_page = parent.children[index + 1];
        let mut child = self.read_node(child_page)?;
        let sibling = self.read_node(sibling_page)?;

        child.entries.push(parent.entries.remove(index));
        child.entries.extend(sibling.entries);
        if !child.is_leaf {
            child.children.extend(sibling.children);
        }
        parent.children.remove(index + 1);

        self.write_node(child_page, &child)?;
        self.write_node(parent_page, parent)?;
        tracing::debug!(child_page, sibling_page, "Merged sibling pages");
        Ok(())
    }

    // ========== Diagnostics ==========

    /// Walk the whole tree and check its structural invariants.
    ///
    /// Checks that keys ascend strictly within each node and respect the
    /// separator bounds of every ancestor, that internal nodes have one more
    /// child than entries, that non-root nodes hold between `degree - 1` and
    /// `max_keys` entries, that all leaves sit at the same depth, and that no
    /// page is reachable twice.
    pub fn verify(&self) -> Result<TreeStats, BTreeError> {
        let mut walk = Walk {
            seen: HashSet::new(),
            leaf_depth: None,
            stats: TreeStats {
                height: 0,
                nodes: 0,
                entries: 0,
            },
        };
        self.verify_node(ROOT_PAGE, None, None, 1, &mut walk)?;
        walk.stats.height = walk.leaf_depth.unwrap_or(1);
        Ok(walk.stats)
    }

    fn verify_node(
        &self,
        page_id: PageId,
        lower: Option<T::Key>,
        upper: Option<T::Key>,
        depth: usize,
        walk: &mut Walk,
    ) -> Result<(), BTreeError> {
        let violation = |reason: String| BTreeError::InvariantViolated { page_id, reason };

        if !walk.seen.insert(page_id) {
            return Err(violation("page reachable more than once".to_string()));
        }

        let node = self.read_node(page_id)?;
        walk.stats.nodes += 1;
        walk.stats.entries += node.entries.len();

        if page_id != ROOT_PAGE && node.entries.len() < self.layout.min_keys() {
            return Err(violation(format!(
                "{} entries, below minimum {}",
                node.entries.len(),
                self.layout.min_keys()
            )));
        }
        if node.entries.len() > self.layout.max_keys() {
            return Err(violation(format!(
                "{} entries, above maximum {}",
                node.entries.len(),
                self.layout.max_keys()
            )));
        }

        let keys: Vec<T::Key> = node.entries.iter().map(Record::key).collect();
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(violation("keys not strictly ascending".to_string()));
        }
        if let (Some(lower), Some(first)) = (lower, keys.first()) {
            if *first <= lower {
                return Err(violation(format!("key {first:?} not above bound {lower:?}")));
            }
        }
        if let (Some(upper), Some(last)) = (upper, keys.last()) {
            if *last >= upper {
                return Err(violation(format!("key {last:?} not below bound {upper:?}")));
            }
        }

        if node.is_leaf {
            match walk.leaf_depth {
                None => walk.leaf_depth = Some(depth),
                Some(expected) if expected != depth => {
                    return Err(violation(format!(
                        "leaf at depth {depth}, expected {expected}"
                    )));
                }
                Some(_) => {}
            }
            return Ok(());
        }

        if node.children.len() != keys.len() + 1 {
            return Err(violation(format!(
                "{} children for {} entries",
                node.children.len(),
                keys.len()
            )));
        }

        for (i, &child) in node.children.iter().enumerate() {
            let child_lower = if i == 0 { lower } else { Some(keys[i - 1]) };
            let child_upper = keys.get(i).copied().or(upper);
            self.verify_node(child, child_lower, child_upper, depth + 1, walk)?;
        }

        Ok(())
    }

    /// Render the tree one node per line, children indented under parents.
    pub fn dump(&self) -> Result<String, BTreeError> {
        let mut out = String::new();
        self.dump_node(ROOT_PAGE, 0, &mut out)?;
        Ok(out)
    }

    fn dump_node(&self, page_id: PageId, level: usize, out: &mut String) -> Result<(), BTreeError> {
        let node = self.read_node(page_id)?;
        let kind = if node.is_leaf { "LEAF" } else { "INTERNAL" };
        let keys: Vec<T::Key> = node.entries.iter().map(Record::key).collect();
        let _ = writeln!(
            out,
            "{:indent$}Page {page_id} [{kind}] Keys: {keys:?}",
            "",
            indent = level * 4
        );

        for &child in &node.children {
            self.dump_node(child, level + 1, out)?;
        }
        Ok(())
    }

    // ========== Page I/O ==========

    fn read_node(&self, page_id: PageId) -> Result<Node<T>, BTreeError> {
        let page = self.storage.read_page(page_id)?;
        Ok(Node::decode(&page, &self.layout))
    }

    fn write_node(&self, page_id: PageId, node: &Node<T>) -> Result<(), BTreeError> {
        let page = node.encode(&self.layout)?;
        self.storage.write_page(page_id, &page)?;
        Ok(())
    }
}

struct Walk {
    seen: HashSet<PageId>,
    leaf_depth: Option<usize>,
    stats: TreeStats,
}

/// Errors that can occur during B-tree operations.
///
/// Storage errors are fatal: the operation stops at the first failed page
/// write and the tree should be treated as unverified.
#[derive(Debug)]
pub enum BTreeError {
    /// Storage error.
    Storage(StorageError),
    /// Node layout or encoding error.
    Node(NodeError),
    /// The tree's structure is inconsistent.
    InvariantViolated { page_id: PageId, reason: String },
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Node(e) => write!(f, "node error: {e}"),
            Self::InvariantViolated { page_id, reason } => {
                write!(f, "invariant violated at page {page_id}: {reason}")
            }
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Node(e) => Some(e),
            Self::InvariantViolated { .. } => None,
        }
    }
}

impl From<StorageError> for BTreeError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<NodeError> for BTreeError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}
