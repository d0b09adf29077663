//! System-wide constants for Quarry.
//!
//! This module defines constants used across the storage engine.

// =============================================================================
// Vector and Row Group Constants
// =============================================================================

/// Standard number of rows in one scan batch ("vector").
pub const STANDARD_VECTOR_SIZE: usize = 2048;

/// Number of vectors in one row group.
pub const ROW_GROUP_VECTOR_COUNT: usize = 60;

/// Default row capacity of a row group (60 vectors).
pub const DEFAULT_ROW_GROUP_SIZE: usize = STANDARD_VECTOR_SIZE * ROW_GROUP_VECTOR_COUNT;

// =============================================================================
// Versioning Constants
// =============================================================================

/// First transaction id. Commit ids always stay below this value, so a
/// version id `>= TRANSACTION_ID_START` belongs to an uncommitted transaction.
pub const TRANSACTION_ID_START: u64 = 1 << 62;

/// Version id stored in the deletion slot of a row that was never deleted.
pub const NOT_DELETED_ID: u64 = u64::MAX;

/// Pseudo column id that makes scans and fetches emit row ids.
pub const COLUMN_IDENTIFIER_ROW_ID: usize = usize::MAX;

// =============================================================================
// Block Constants
// =============================================================================

/// Default block size in bytes (256 KB).
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Minimum block size in bytes (4 KB).
pub const MIN_BLOCK_SIZE: usize = 4 * 1024;

/// Block header size in bytes: checksum (4) + payload length (4) + next block (8).
pub const BLOCK_HEADER_SIZE: usize = 16;

/// Sentinel block id meaning "no block".
pub const INVALID_BLOCK: u64 = u64::MAX;

// =============================================================================
// Log Constants
// =============================================================================

/// Maximum log record size (64 MB).
pub const MAX_LOG_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// Log record header size.
///
/// Contains: lsn (8), record type (1), flags (1), reserved (2),
/// payload length (4), checksum (4), padding (4) = 24 bytes.
pub const LOG_RECORD_HEADER_SIZE: usize = 24;

/// Magic number at the start of a checkpointed table root.
pub const TABLE_DATA_MAGIC: u32 = 0x5152_5444; // "QRTD" in ASCII

/// Schema name of temporary tables.
pub const TEMP_SCHEMA: &str = "temp";
