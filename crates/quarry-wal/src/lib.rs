//! # quarry-wal
//!
//! Write-ahead logging for Quarry tables.
//!
//! The table storage layer hands row-level changes to a [`WriteAheadLog`];
//! ordering and fsync policy are the log's responsibility. Replay reads the
//! records back with a [`LogReader`].
//!
//! ## Record Format
//!
//! Each record consists of a 24-byte header followed by a variable-length payload:
//!
//! ```text
//! +----------+------+-------+----------+--------+----------+---------+
//! | LSN (8)  | Type | Flags | Reserved | Length | Checksum | Padding |
//! +----------+------+-------+----------+--------+----------+---------+
//! |                      Payload (variable)                          |
//! +------------------------------------------------------------------+
//! ```
//!
//! A log is a sequence of `SetTable` records, each followed by the
//! `Insert`, `Delete` and `Update` records of that table.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod error;

/// Log record types and serialization.
pub mod record;

/// Log writer for appending records.
pub mod writer;

/// Log reader for replay.
pub mod reader;

use quarry_common::types::{DataChunk, RowId, Vector};

// Re-exports for convenience
pub use config::{LogConfig, SyncPolicy};
pub use error::{WalError, WalResult};
pub use reader::LogReader;
pub use record::{
    DeletePayload, InsertPayload, LogPayload, LogRecord, RecordFlags, RecordHeader, RecordType,
    SetTablePayload, UpdatePayload,
};
pub use writer::LogWriter;

/// Destination of table changes.
///
/// Implementations serialize calls internally; a table calls
/// `write_set_table` before the data records that belong to it.
pub trait WriteAheadLog: Send + Sync {
    /// Selects the table that subsequent records apply to.
    fn write_set_table(&self, schema: &str, table: &str) -> WalResult<()>;

    /// Logs appended rows.
    fn write_insert(&self, chunk: &DataChunk) -> WalResult<()>;

    /// Logs deleted rows.
    fn write_delete(&self, row_ids: &[RowId]) -> WalResult<()>;

    /// Logs updated values of one (sub-)column.
    fn write_update(&self, column_path: &[usize], row_ids: &[RowId], values: &Vector) -> WalResult<()>;

    /// Makes all logged records durable according to the log's sync policy.
    fn flush(&self) -> WalResult<()>;
}
