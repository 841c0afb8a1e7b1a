//! Execution trace records.

use crate::records::{FieldReader, FieldWriter, truncate_to_width};
use crate::storage::btree::Record;

/// Width of the function name field in bytes.
pub const FUNCTION_WIDTH: usize = 128;
/// Width of the message field in bytes.
pub const MESSAGE_WIDTH: usize = 256;
/// Width of the application version field in bytes.
pub const APP_VERSION_WIDTH: usize = 32;

/// One logged function execution, keyed by `id`.
///
/// `version` counts executions of the same function within a project,
/// starting at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub id: u64,
    pub project_id: u32,
    pub version: u32,
    pub timestamp_ms: u64,
    pub duration_ms: u64,
    pub ram_bytes: u64,
    pub rom_bytes: u64,
    pub function: String,
    pub message: String,
    pub app_version: String,
}

/// The caller-supplied part of a trace, before id, version and timestamp
/// are assigned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTrace {
    pub project_id: u32,
    pub function: String,
    pub message: String,
    pub app_version: String,
    pub duration_ms: u64,
    pub ram_bytes: u64,
    pub rom_bytes: u64,
}

impl NewTrace {
    /// A trace with only the required fields set.
    #[must_use]
    pub fn new(project_id: u32, function: &str, duration_ms: u64) -> Self {
        Self {
            project_id,
            function: function.to_string(),
            duration_ms,
            ..Self::default()
        }
    }

    /// Set the message.
    #[must_use]
    pub fn message(mut self, message: &str) -> Self {
        self.message = message.to_string();
        self
    }

    /// Set the application version.
    #[must_use]
    pub fn app_version(mut self, app_version: &str) -> Self {
        self.app_version = app_version.to_string();
        self
    }

    /// Set the memory footprint.
    #[must_use]
    pub const fn ram_bytes(mut self, ram_bytes: u64) -> Self {
        self.ram_bytes = ram_bytes;
        self
    }

    /// Set the storage footprint.
    #[must_use]
    pub const fn rom_bytes(mut self, rom_bytes: u64) -> Self {
        self.rom_bytes = rom_bytes;
        self
    }
}

impl TraceEntry {
    /// Build the stored form of `trace`.
    ///
    /// Text fields are cut to what their fixed widths can hold, so the
    /// returned entry equals what a later read yields.
    #[must_use]
    pub fn from_new(id: u64, version: u32, timestamp_ms: u64, trace: NewTrace) -> Self {
        Self {
            id,
            project_id: trace.project_id,
            version,
            timestamp_ms,
            duration_ms: trace.duration_ms,
            ram_bytes: trace.ram_bytes,
            rom_bytes: trace.rom_bytes,
            function: truncate_to_width(&trace.function, FUNCTION_WIDTH).to_string(),
            message: truncate_to_width(&trace.message, MESSAGE_WIDTH).to_string(),
            app_version: truncate_to_width(&trace.app_version, APP_VERSION_WIDTH).to_string(),
        }
    }
}

impl std::fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] project {} | {} v{} | {} ms | RAM {} | {}",
            self.id,
            self.project_id,
            self.function,
            self.version,
            self.duration_ms,
            self.ram_bytes,
            self.message
        )
    }
}

impl Record for TraceEntry {
    type Key = u64;

    const ENCODED_SIZE: usize = 8 + 4 + 4 + 8 * 4 + FUNCTION_WIDTH + MESSAGE_WIDTH + APP_VERSION_WIDTH;

    fn key(&self) -> u64 {
        self.id
    }

    fn encode(&self, buf: &mut [u8]) {
        let mut w = FieldWriter::new(buf);
        w.u64(self.id);
        w.u32(self.project_id);
        w.u32(self.version);
        w.u64(self.timestamp_ms);
        w.u64(self.duration_ms);
        w.u64(self.ram_bytes);
        w.u64(self.rom_bytes);
        w.str(&self.function, FUNCTION_WIDTH);
        w.str(&self.message, MESSAGE_WIDTH);
        w.str(&self.app_version, APP_VERSION_WIDTH);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut r = FieldReader::new(buf);
        Self {
            id: r.u64(),
            project_id: r.u32(),
            version: r.u32(),
            timestamp_ms: r.u64(),
            duration_ms: r.u64(),
            ram_bytes: r.u64(),
            rom_bytes: r.u64(),
            function: r.str(FUNCTION_WIDTH),
            message: r.str(MESSAGE_WIDTH),
            app_version: r.str(APP_VERSION_WIDTH),
        }
    }
}
