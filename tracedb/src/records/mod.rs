//! Concrete record types stored by the databases.
//!
//! Every record has a fixed encoded size. Text fields occupy a fixed number
//! of bytes, NUL-padded, and always keep at least one terminating NUL.

mod project;
mod trace;

pub use project::{
    API_KEY_WIDTH, DEFAULT_FAST_MS, DEFAULT_NORMAL_MS, PROJECT_NAME_WIDTH, ProjectEntry, Speed,
};
pub use trace::{APP_VERSION_WIDTH, FUNCTION_WIDTH, MESSAGE_WIDTH, NewTrace, TraceEntry};

/// Sequential writer over a record's encode buffer.
pub(crate) struct FieldWriter<'a> {
    buf: &'a mut [u8],
    offset: usize,
}

impl<'a> FieldWriter<'a> {
    pub(crate) const fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.offset..self.offset + bytes.len()].copy_from_slice(bytes);
        self.offset += bytes.len();
    }

    pub(crate) fn u32(&mut self, value: u32) {
        self.put(&value.to_le_bytes());
    }

    pub(crate) fn u64(&mut self, value: u64) {
        self.put(&value.to_le_bytes());
    }

    /// Write `value` into a `width`-byte NUL-padded field.
    pub(crate) fn str(&mut self, value: &str, width: usize) {
        let text = truncate_to_width(value, width);
        let field = &mut self.buf[self.offset..self.offset + width];
        field.fill(0);
        field[..text.len()].copy_from_slice(text.as_bytes());
        self.offset += width;
    }
}

/// Sequential reader over a record's decode buffer.
pub(crate) struct FieldReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    pub(crate) const fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.offset..self.offset + N]);
        self.offset += N;
        out
    }

    pub(crate) fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    pub(crate) fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    /// Read a `width`-byte NUL-padded field.
    ///
    /// Stops at the first NUL. Invalid UTF-8 is replaced rather than rejected.
    pub(crate) fn str(&mut self, width: usize) -> String {
        let field = &self.buf[self.offset..self.offset + width];
        self.offset += width;
        let end = field.iter().position(|&b| b == 0).unwrap_or(width);
        String::from_utf8_lossy(&field[..end]).into_owned()
    }
}

/// Longest prefix of `value` that fits a `width`-byte field with a NUL left over.
///
/// Cuts at a char boundary, and at the first NUL if `value` contains one.
#[must_use]
pub fn truncate_to_width(value: &str, width: usize) -> &str {
    let value = value.split('\0').next().unwrap_or_default();
    let limit = width.saturating_sub(1);
    if value.len() <= limit {
        return value;
    }

    let mut end = limit;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
