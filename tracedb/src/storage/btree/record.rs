//! The contract every record stored in a B-tree satisfies.

use std::fmt::Debug;

/// A fixed-layout record that can live in a B-tree page.
///
/// The key's total order is both the sort order of the tree and its
/// deduplication rule: two records with equal keys are the same record, and
/// storing the second one replaces the first.
///
/// # Invariants
///
/// - `encode` writes exactly `ENCODED_SIZE` bytes into a buffer of that size
/// - `decode(encode(r))` yields a record with the same key and field values
/// - `decode` never panics on a buffer of `ENCODED_SIZE` bytes, whatever its
///   contents (pages may be corrupt)
pub trait Record: Clone + Debug {
    /// The sort and deduplication key.
    type Key: Ord + Copy + Debug;

    /// Size of one encoded record in bytes.
    const ENCODED_SIZE: usize;

    /// Extract the key.
    fn key(&self) -> Self::Key;

    /// Serialize into `buf`, which is exactly `ENCODED_SIZE` bytes long.
    fn encode(&self, buf: &mut [u8]);

    /// Deserialize from `buf`, which is exactly `ENCODED_SIZE` bytes long.
    fn decode(buf: &[u8]) -> Self;
}
