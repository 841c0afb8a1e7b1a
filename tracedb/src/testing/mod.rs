//! Shared test fixtures.

use crate::storage::btree::Record;

/// A small record keyed by `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestRecord {
    pub id: u32,
    pub payload: u32,
}

impl TestRecord {
    pub const fn new(id: u32, payload: u32) -> Self {
        Self { id, payload }
    }
}

impl Record for TestRecord {
    type Key = u32;

    const ENCODED_SIZE: usize = 8;

    fn key(&self) -> u32 {
        self.id
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.payload.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        let mut id = [0u8; 4];
        let mut payload = [0u8; 4];
        id.copy_from_slice(&buf[..4]);
        payload.copy_from_slice(&buf[4..8]);
        Self {
            id: u32::from_le_bytes(id),
            payload: u32::from_le_bytes(payload),
        }
    }
}
