//! Storage error types.
//!
//! Provides the error taxonomy for all table storage operations.

use std::fmt;
use thiserror::Error;

use crate::types::{BlockId, RowId};

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Unknown or unspecified error.
    Unknown = 0x0000,
    /// Internal error (bug).
    Internal = 0x0001,
    /// Operation not supported.
    NotSupported = 0x0002,
    /// Invalid argument provided.
    InvalidArgument = 0x0003,

    // I/O errors (0x0100 - 0x01FF)
    /// General I/O error.
    Io = 0x0100,
    /// Data corruption detected.
    Corruption = 0x0104,

    // Storage errors (0x0200 - 0x02FF)
    /// Block not found in the block manager.
    BlockNotFound = 0x0200,
    /// Table generation is not the root and cannot be written.
    NotRoot = 0x0201,
    /// Row id outside of the table.
    RowOutOfRange = 0x0202,

    // Transaction errors (0x0300 - 0x03FF)
    /// Write-write conflict between transactions.
    WriteConflict = 0x0301,

    // Constraint errors (0x0400 - 0x04FF)
    /// A NOT NULL or CHECK constraint failed.
    ConstraintViolation = 0x0400,
    /// An index rejected a duplicate key.
    UniqueViolation = 0x0401,
    /// An index or other object depends on the target.
    DependencyViolation = 0x0402,

    // Type errors (0x0600 - 0x06FF)
    /// Type mismatch.
    TypeMismatch = 0x0603,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "I/O",
            0x02 => "Storage",
            0x03 => "Transaction",
            0x04 => "Constraint",
            0x06 => "Type",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for Quarry storage.
///
/// Each variant includes the context needed to report the failure. The
/// write path distinguishes constraint failures (raised before any
/// mutation), index insertion failures (rolled back locally), write-write
/// conflicts and I/O failures (which require the caller to revert).
///
/// # Example
///
/// ```rust
/// use quarry_common::error::{QuarryError, QuarryResult};
///
/// fn check(value: Option<i32>) -> QuarryResult<i32> {
///     value.ok_or_else(|| QuarryError::constraint("NOT NULL constraint failed: column 0"))
/// }
/// assert!(check(None).unwrap_err().is_constraint_violation());
/// ```
#[derive(Debug, Error)]
pub enum QuarryError {
    // ==========================================================================
    // General Errors
    // ==========================================================================
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Operation not supported.
    #[error("operation not supported: {operation}")]
    NotSupported {
        /// The unsupported operation.
        operation: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    // ==========================================================================
    // I/O Errors
    // ==========================================================================
    /// I/O error from the underlying system or a collaborator.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Data corruption detected.
    #[error("data corruption detected: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    // ==========================================================================
    // Storage Errors
    // ==========================================================================
    /// Block not found.
    #[error("block {block_id} not found")]
    BlockNotFound {
        /// The missing block.
        block_id: BlockId,
    },

    /// Write attempted on a table generation that is not the root.
    #[error("table '{table}' is not the root generation and cannot be {operation}")]
    NotRoot {
        /// The table name.
        table: String,
        /// The rejected operation.
        operation: &'static str,
    },

    /// Row id outside the table.
    #[error("row {row_id} is out of range (table has {total_rows} rows)")]
    RowOutOfRange {
        /// The offending row id.
        row_id: RowId,
        /// Row count at the time of the call.
        total_rows: u64,
    },

    // ==========================================================================
    // Transaction Errors
    // ==========================================================================
    /// Write-write conflict on a row.
    #[error("write-write conflict on row {row_id}: row is locked by version {version}")]
    WriteConflict {
        /// The conflicting row.
        row_id: RowId,
        /// The version id (transaction or commit id) holding the row.
        version: u64,
    },

    // ==========================================================================
    // Constraint Errors
    // ==========================================================================
    /// NOT NULL or CHECK constraint failed.
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        /// Error message.
        message: String,
    },

    /// An index rejected a duplicate key.
    #[error("duplicate key in index '{index}': {key}")]
    UniqueViolation {
        /// The index name.
        index: String,
        /// Rendered key.
        key: String,
    },

    /// The target of a schema change is referenced by another object.
    #[error("cannot alter column {column}: {reason}")]
    DependencyViolation {
        /// The column being altered.
        column: usize,
        /// The dependency.
        reason: String,
    },

    // ==========================================================================
    // Type Errors
    // ==========================================================================
    /// Type mismatch.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type.
        expected: String,
        /// Actual type.
        actual: String,
    },

    // ==========================================================================
    // Configuration Errors
    // ==========================================================================
    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },
}

impl QuarryError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::NotSupported { .. } => ErrorCode::NotSupported,
            Self::InvalidArgument { .. } | Self::InvalidConfig { .. } => {
                ErrorCode::InvalidArgument
            }
            Self::Io { .. } => ErrorCode::Io,
            Self::Corruption { .. } | Self::ChecksumMismatch { .. } => ErrorCode::Corruption,
            Self::BlockNotFound { .. } => ErrorCode::BlockNotFound,
            Self::NotRoot { .. } => ErrorCode::NotRoot,
            Self::RowOutOfRange { .. } => ErrorCode::RowOutOfRange,
            Self::WriteConflict { .. } => ErrorCode::WriteConflict,
            Self::ConstraintViolation { .. } => ErrorCode::ConstraintViolation,
            Self::UniqueViolation { .. } => ErrorCode::UniqueViolation,
            Self::DependencyViolation { .. } => ErrorCode::DependencyViolation,
            Self::TypeMismatch { .. } => ErrorCode::TypeMismatch,
        }
    }

    /// Returns true if this error represents a write-write conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::WriteConflict { .. })
    }

    /// Returns true if this error was raised by constraint or index verification.
    #[must_use]
    pub const fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::ConstraintViolation { .. } | Self::UniqueViolation { .. }
        )
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a not supported error.
    #[must_use]
    pub fn not_supported(operation: impl Into<String>) -> Self {
        Self::NotSupported {
            operation: operation.into(),
        }
    }

    /// Creates a corruption error.
    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates a constraint violation error.
    #[must_use]
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }

    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = QuarryError::BlockNotFound {
            block_id: BlockId::new(42),
        };
        assert_eq!(err.code(), ErrorCode::BlockNotFound);
        assert_eq!(err.code().category(), "Storage");
    }

    #[test]
    fn test_error_display() {
        let err = QuarryError::WriteConflict {
            row_id: RowId::new(7),
            version: 3,
        };
        assert_eq!(
            err.to_string(),
            "write-write conflict on row 7: row is locked by version 3"
        );
    }

    #[test]
    fn test_conflict_is_distinct_from_constraints() {
        let conflict = QuarryError::WriteConflict {
            row_id: RowId::new(1),
            version: 2,
        };
        assert!(conflict.is_conflict());
        assert!(!conflict.is_constraint_violation());

        let unique = QuarryError::UniqueViolation {
            index: "pk".into(),
            key: "(1)".into(),
        };
        assert!(unique.is_constraint_violation());
        assert!(!unique.is_conflict());
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err: QuarryError = io_err.into();
        assert_eq!(err.code(), ErrorCode::Io);
    }
}
