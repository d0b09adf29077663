//! Log error types.
//!
//! This module defines all error types for the write-ahead log.

use std::io;
use thiserror::Error;

use quarry_common::QuarryError;

/// Result type for log operations.
pub type WalResult<T> = Result<T, WalError>;

/// Errors that can occur during log operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// I/O error during log operations.
    #[error("log I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: io::Error,
    },

    /// Log record checksum mismatch.
    #[error("log record checksum mismatch at LSN {lsn}: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// LSN of the corrupt record.
        lsn: u64,
        /// Checksum stored in the header.
        expected: u32,
        /// Checksum computed over the record.
        computed: u32,
    },

    /// Log record too large.
    #[error("log record too large: {size} bytes exceeds maximum {max} bytes")]
    RecordTooLarge {
        /// Encoded size of the record.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Log record deserialization error.
    #[error("failed to deserialize log record: {reason}")]
    DeserializationError {
        /// Description of the failure.
        reason: String,
    },

    /// Encoding of the record's columnar data failed.
    #[error("failed to encode log record: {source}")]
    Encoding {
        /// The codec error.
        #[from]
        source: QuarryError,
    },

    /// The log is closed.
    #[error("log is closed")]
    Closed,

    /// Configuration error.
    #[error("log configuration error: {reason}")]
    ConfigError {
        /// Description of the problem.
        reason: String,
    },
}

impl WalError {
    /// Creates a checksum mismatch error.
    pub fn checksum_mismatch(lsn: u64, expected: u32, computed: u32) -> Self {
        Self::ChecksumMismatch {
            lsn,
            expected,
            computed,
        }
    }

    /// Creates a record too large error.
    pub fn record_too_large(size: usize, max: usize) -> Self {
        Self::RecordTooLarge { size, max }
    }

    /// Creates a deserialization error.
    pub fn deserialization_error(reason: impl Into<String>) -> Self {
        Self::DeserializationError {
            reason: reason.into(),
        }
    }

    /// Creates a config error.
    pub fn config_error(reason: impl Into<String>) -> Self {
        Self::ConfigError {
            reason: reason.into(),
        }
    }

    /// Returns true if this is a corruption error.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. } | Self::DeserializationError { .. }
        )
    }
}

impl From<WalError> for QuarryError {
    fn from(err: WalError) -> Self {
        match err {
            WalError::Io { source } => QuarryError::Io { source },
            WalError::ChecksumMismatch {
                expected, computed, ..
            } => QuarryError::ChecksumMismatch {
                expected,
                actual: computed,
            },
            WalError::Encoding { source } => source,
            WalError::DeserializationError { reason } => QuarryError::corruption(reason),
            WalError::ConfigError { reason } => QuarryError::InvalidConfig { message: reason },
            other => QuarryError::Io {
                source: io::Error::new(io::ErrorKind::Other, other.to_string()),
            },
        }
    }
}
