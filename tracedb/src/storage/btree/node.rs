//! B-tree node types and serialization.
//!
//! A node occupies exactly one page:
//!
//! ```text
//! [is_leaf: 1][entry_count: i32][entry_count * ENCODED_SIZE]
//! [child_count: i32][child_count * u32 page id][zero padding]
//! ```
//!
//! Integers are little-endian. Leaves always carry `child_count = 0`.
//! An all-zero page decodes as an empty leaf.

// Entry and child counts are bounded by the page size, far below i32::MAX.
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use crate::storage::btree::record::Record;
use crate::storage::page::{PAGE_ID_SIZE, PAGE_SIZE, Page, PageId};

/// Fixed bytes per node: `is_leaf` (1) + `entry_count` (4) + `child_count` (4).
pub const NODE_HEADER_SIZE: usize = 9;

/// Smallest degree the tree operates with.
pub const MIN_DEGREE: usize = 2;

const IS_LEAF_OFFSET: usize = 0;
const ENTRY_COUNT_OFFSET: usize = 1;
const ENTRIES_OFFSET: usize = 5;

/// Capacity constants for one record type.
///
/// - `capacity`: how many entries physically fit in a page alongside
///   `capacity + 1` child pointers
/// - `degree`: minimum branching factor; non-root nodes keep at least
///   `degree - 1` entries
/// - `max_keys`: `2 * degree - 1`; a node this size is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    capacity: usize,
    degree: usize,
    max_keys: usize,
}

impl NodeLayout {
    /// Derive the layout for `T` from the page size.
    ///
    /// Fails if a page cannot hold enough entries for a degree of at least
    /// `MIN_DEGREE`.
    pub fn for_record<T: Record>() -> Result<Self, NodeError> {
        let capacity = (PAGE_SIZE - NODE_HEADER_SIZE - PAGE_ID_SIZE) / (T::ENCODED_SIZE + PAGE_ID_SIZE);
        let degree = (capacity + 1) / 2;

        if degree < MIN_DEGREE {
            return Err(NodeError::RecordTooLarge {
                record_size: T::ENCODED_SIZE,
                capacity,
            });
        }

        Ok(Self {
            capacity,
            degree,
            max_keys: 2 * degree - 1,
        })
    }

    /// Derive the layout for `T`, then lower its degree to `degree`.
    ///
    /// Fails if `degree` is below `MIN_DEGREE` or above what a page allows.
    pub fn with_max_degree<T: Record>(degree: usize) -> Result<Self, NodeError> {
        let natural = Self::for_record::<T>()?;
        if degree < MIN_DEGREE || degree > natural.degree {
            return Err(NodeError::InvalidDegree {
                requested: degree,
                max: natural.degree,
            });
        }

        Ok(Self {
            capacity: natural.capacity,
            degree,
            max_keys: 2 * degree - 1,
        })
    }

    /// Entries that physically fit in one page.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Minimum branching factor.
    #[must_use]
    pub const fn degree(&self) -> usize {
        self.degree
    }

    /// Entry count at which a node is full.
    #[must_use]
    pub const fn max_keys(&self) -> usize {
        self.max_keys
    }

    /// Fewest entries a non-root node may hold.
    #[must_use]
    pub const fn min_keys(&self) -> usize {
        self.degree - 1
    }
}

/// The decoded form of a page.
///
/// For internal nodes, `children.len() == entries.len() + 1`; the subtree at
/// `children[i]` holds keys below `entries[i]` and the subtree at
/// `children[i + 1]` holds keys above it. Leaves have no children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node<T> {
    pub is_leaf: bool,
    /// Entries in ascending key order.
    pub entries: Vec<T>,
    /// Child page ids, empty for leaves.
    pub children: Vec<PageId>,
}

impl<T: Record> Node<T> {
    /// Create a new empty leaf.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::new() is not const-stable
    pub fn new_leaf() -> Self {
        Self {
            is_leaf: true,
            entries: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Create an internal node with no entries and a single child.
    ///
    /// Only valid as a transient state while the root is being split.
    #[must_use]
    pub fn with_only_child(child: PageId) -> Self {
        Self {
            is_leaf: false,
            entries: Vec::new(),
            children: vec![child],
        }
    }

    /// Check if the node is full.
    #[must_use]
    pub fn is_full(&self, layout: &NodeLayout) -> bool {
        self.entries.len() >= layout.max_keys
    }

    /// Binary search for `key` among the entries.
    ///
    /// `Ok(i)` if `entries[i]` has the key, `Err(i)` with the insert position otherwise.
    pub fn find_index(&self, key: &T::Key) -> Result<usize, usize> {
        self.entries.binary_search_by(|e| e.key().cmp(key))
    }

    /// Serialize the node into a fresh page.
    ///
    /// Unused tail bytes stay zero. Fails if the node holds more entries than
    /// a page can fit.
    pub fn encode(&self, layout: &NodeLayout) -> Result<Page, NodeError> {
        let child_count = if self.is_leaf { 0 } else { self.children.len() };
        if self.entries.len() > layout.capacity || child_count > layout.capacity + 1 {
            return Err(NodeError::NodeOverflow {
                entries: self.entries.len(),
                children: child_count,
                capacity: layout.capacity,
            });
        }

        let mut page = Page::new();
        page.write_u8(IS_LEAF_OFFSET, u8::from(self.is_leaf));
        page.write_i32(ENTRY_COUNT_OFFSET, self.entries.len() as i32);

        let mut offset = ENTRIES_OFFSET;
        for entry in &self.entries {
            entry.encode(&mut page.as_bytes_mut()[offset..offset + T::ENCODED_SIZE]);
            offset += T::ENCODED_SIZE;
        }

        page.write_i32(offset, child_count as i32);
        offset += 4;

        if !self.is_leaf {
            for &child in &self.children {
                page.write_u32(offset, child);
                offset += PAGE_ID_SIZE;
            }
        }

        Ok(page)
    }

    /// Deserialize a node from a page.
    ///
    /// Never fails. A page whose counts are implausible (negative, beyond the
    /// page capacity) degrades to an empty leaf, and an internal node whose
    /// child count does not match its entries is coerced to a leaf. Data
    /// written with a different record layout is lost this way rather than
    /// read out of bounds.
    #[must_use]
    pub fn decode(page: &Page, layout: &NodeLayout) -> Self {
        let is_leaf = page.read_u8(IS_LEAF_OFFSET) != 0;
        let raw_count = page.read_i32(ENTRY_COUNT_OFFSET);

        let Some(count) = usize::try_from(raw_count)
            .ok()
            .filter(|&n| n <= layout.capacity)
        else {
            tracing::warn!(raw_count, "discarding page with implausible entry count");
            return Self::new_leaf();
        };

        let entries: Vec<T> = (0..count)
            .map(|i| T::decode(page.read_bytes(ENTRIES_OFFSET + i * T::ENCODED_SIZE, T::ENCODED_SIZE)))
            .collect();

        let child_count_offset = ENTRIES_OFFSET + count * T::ENCODED_SIZE;
        let raw_children = page.read_i32(child_count_offset);

        let mut children = Vec::new();
        if !is_leaf {
            match usize::try_from(raw_children)
                .ok()
                .filter(|&n| n <= layout.capacity + 1)
            {
                Some(n) => {
                    let first = child_count_offset + 4;
                    children = (0..n)
                        .map(|i| page.read_u32(first + i * PAGE_ID_SIZE))
                        .collect();
                }
                None => {
                    tracing::warn!(raw_children, "discarding implausible child count");
                }
            }
        }

        let mut node = Self {
            is_leaf,
            entries,
            children,
        };

        if !node.is_leaf && node.children.len() != node.entries.len() + 1 {
            if !node.children.is_empty() {
                tracing::warn!(
                    entries = node.entries.len(),
                    children = node.children.len(),
                    "internal node has mismatched child count, treating as leaf"
                );
            }
            node.is_leaf = true;
            node.children.clear();
        }

        node
    }
}

/// Errors that can occur when working with B-tree nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The record type is too large for a page to hold a usable node.
    RecordTooLarge { record_size: usize, capacity: usize },
    /// A requested degree is out of range for the record type.
    InvalidDegree { requested: usize, max: usize },
    /// A node holds more entries than fit in a page.
    NodeOverflow {
        entries: usize,
        children: usize,
        capacity: usize,
    },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RecordTooLarge {
                record_size,
                capacity,
            } => write!(
                f,
                "record of {record_size} bytes leaves room for only {capacity} entries per page"
            ),
            Self::InvalidDegree { requested, max } => {
                write!(
                    f,
                    "invalid degree {requested} (must be between {MIN_DEGREE} and {max})"
                )
            }
            Self::NodeOverflow {
                entries,
                children,
                capacity,
            } => write!(
                f,
                "node with {entries} entries and {children} children exceeds page capacity of {capacity}"
            ),
        }
    }
}

impl std::error::Error for NodeError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestRecord;

    #[derive(Debug, Clone)]
    struct Blob<const N: usize>;

    impl<const N: usize> Record for Blob<N> {
        type Key = u8;
        const ENCODED_SIZE: usize = N;

        fn key(&self) -> u8 {
            0
        }

        fn encode(&self, _buf: &mut [u8]) {}

        fn decode(_buf: &[u8]) -> Self {
            Self
        }
    }

    fn layout() -> NodeLayout {
        NodeLayout::for_record::<TestRecord>().expect("layout")
    }

    fn records(ids: &[u32]) -> Vec<TestRecord> {
        ids.iter().map(|&id| TestRecord::new(id, id * 10)).collect()
    }

    #[test]
    fn test_layout_for_small_record() {
        // (4096 - 13) / (8 + 4) = 340 entries; degree = 170.
        let layout = layout();
        assert_eq!(layout.capacity(), 340);
        assert_eq!(layout.degree(), 170);
        assert_eq!(layout.max_keys(), 339);
        assert_eq!(layout.min_keys(), 169);
    }

    #[test]
    fn test_layout_odd_capacity() {
        // (4096 - 13) / (448 + 4) = 9 entries; degree = 5, max_keys = 9.
        let layout = NodeLayout::for_record::<Blob<448>>().expect("layout");
        assert_eq!(layout.capacity(), 9);
        assert_eq!(layout.degree(), 5);
        assert_eq!(layout.max_keys(), 9);
    }

    #[test]
    fn test_full_node_fits_in_page() {
        let layout = NodeLayout::for_record::<Blob<1300>>().expect("layout");
        assert_eq!(layout.degree(), 2);
        assert!(
            NODE_HEADER_SIZE
                + layout.max_keys() * 1300
                + (layout.max_keys() + 1) * PAGE_ID_SIZE
                <= PAGE_SIZE
        );
    }

    #[test]
    fn test_layout_rejects_oversized_record() {
        let err = NodeLayout::for_record::<Blob<2000>>().expect_err("too large");
        assert_eq!(
            err,
            NodeError::RecordTooLarge {
                record_size: 2000,
                capacity: 2
            }
        );
    }

    #[test]
    fn test_with_max_degree_bounds() {
        let layout = NodeLayout::with_max_degree::<TestRecord>(3).expect("degree 3");
        assert_eq!(layout.degree(), 3);
        assert_eq!(layout.max_keys(), 5);

        assert!(matches!(
            NodeLayout::with_max_degree::<TestRecord>(1),
            Err(NodeError::InvalidDegree { .. })
        ));
        assert!(matches!(
            NodeLayout::with_max_degree::<TestRecord>(171),
            Err(NodeError::InvalidDegree { max: 170, .. })
        ));
    }

    #[test]
    fn test_leaf_roundtrip() {
        let layout = layout();
        let node = Node {
            is_leaf: true,
            entries: records(&[1, 2, 3]),
            children: Vec::new(),
        };

        let page = node.encode(&layout).expect("encode");
        assert_eq!(page.read_u8(0), 1);
        assert_eq!(page.read_i32(1), 3);
        assert_eq!(page.read_i32(5 + 3 * 8), 0);

        assert_eq!(Node::decode(&page, &layout), node);
    }

    #[test]
    fn test_internal_roundtrip() {
        let layout = layout();
        let node = Node {
            is_leaf: false,
            entries: records(&[10, 20, 30]),
            children: vec![4, 5, 6, 7],
        };

        let page = node.encode(&layout).expect("encode");
        assert_eq!(page.read_i32(5 + 3 * 8), 4);
        assert_eq!(page.read_u32(5 + 3 * 8 + 4), 4);

        assert_eq!(Node::decode(&page, &layout), node);
    }

    #[test]
    fn test_full_node_roundtrip() {
        let layout = NodeLayout::for_record::<TestRecord>().expect("layout");
        let ids: Vec<u32> = (0..u32::try_from(layout.max_keys()).expect("fits")).collect();
        let node = Node {
            is_leaf: false,
            entries: records(&ids),
            children: (0..=u32::try_from(layout.max_keys()).expect("fits")).collect(),
        };

        let page = node.encode(&layout).expect("encode");
        assert_eq!(Node::decode(&page, &layout), node);
    }

    #[test]
    fn test_zeroed_page_is_empty_leaf() {
        let node = Node::<TestRecord>::decode(&Page::new(), &layout());
        assert_eq!(node, Node::new_leaf());
    }

    #[test]
    fn test_negative_count_degrades_to_empty() {
        let mut page = Page::new();
        page.write_u8(0, 1);
        page.write_i32(1, -5);

        let node = Node::<TestRecord>::decode(&page, &layout());
        assert_eq!(node, Node::new_leaf());
    }

    #[test]
    fn test_oversized_count_degrades_to_empty() {
        let mut page = Page::new();
        page.write_u8(0, 0);
        page.write_i32(1, 100_000);

        let node = Node::<TestRecord>::decode(&page, &layout());
        assert_eq!(node, Node::new_leaf());
    }

    #[test]
    fn test_internal_without_children_becomes_leaf() {
        let layout = layout();
        let mut page = Node {
            is_leaf: true,
            entries: records(&[1, 2]),
            children: Vec::new(),
        }
        .encode(&layout)
        .expect("encode");
        page.write_u8(0, 0);

        let node = Node::<TestRecord>::decode(&page, &layout);
        assert!(node.is_leaf);
        assert_eq!(node.entries, records(&[1, 2]));
        assert!(node.children.is_empty());
    }

    #[test]
    fn test_internal_with_wrong_child_count_becomes_leaf() {
        let layout = layout();
        let page = Node {
            is_leaf: false,
            entries: records(&[1, 2]),
            children: vec![3, 4],
        }
        .encode(&layout)
        .expect("encode");

        let node = Node::<TestRecord>::decode(&page, &layout);
        assert!(node.is_leaf);
        assert!(node.children.is_empty());
    }

    #[test]
    fn test_encode_rejects_overflow() {
        let layout = NodeLayout::for_record::<Blob<448>>().expect("layout");
        let node = Node {
            is_leaf: true,
            entries: vec![Blob::<448>; 10],
            children: Vec::new(),
        };

        assert!(matches!(
            node.encode(&layout),
            Err(NodeError::NodeOverflow { entries: 10, .. })
        ));
    }

    #[test]
    fn test_find_index() {
        let node = Node {
            is_leaf: true,
            entries: records(&[10, 20, 30]),
            children: Vec::new(),
        };

        assert_eq!(node.find_index(&5), Err(0));
        assert_eq!(node.find_index(&20), Ok(1));
        assert_eq!(node.find_index(&25), Err(2));
        assert_eq!(node.find_index(&35), Err(3));
    }
}
