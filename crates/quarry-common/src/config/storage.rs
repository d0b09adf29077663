//! Storage engine configuration.
//!
//! One `StorageConfig` is carried by every table and fixes the geometry of
//! its row groups, scan vectors and persisted blocks.

use serde::{Deserialize, Serialize};

use crate::constants::{
    BLOCK_HEADER_SIZE, DEFAULT_BLOCK_SIZE, DEFAULT_ROW_GROUP_SIZE, MIN_BLOCK_SIZE,
    ROW_GROUP_VECTOR_COUNT, STANDARD_VECTOR_SIZE,
};
use crate::error::{QuarryError, QuarryResult};

/// Table storage configuration.
///
/// # Example
///
/// ```rust
/// use quarry_common::config::StorageConfig;
///
/// let config = StorageConfig::default().with_row_group_size(1024).with_vector_size(256);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.vectors_per_row_group(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Row capacity of each row group. Must be a multiple of `vector_size`.
    /// Default: 122880 (60 vectors)
    pub row_group_size: usize,

    /// Rows per scan batch. Must be a power of 2.
    /// Default: 2048
    pub vector_size: usize,

    /// Size of each persisted block in bytes.
    /// Default: 262144 (256 KB)
    pub block_size: usize,

    /// Number of vectors handed to a parallel scan worker per claim.
    /// Default: 60 (one full row group)
    pub parallel_scan_vector_count: usize,

    /// Verify block checksums when reading persisted data.
    /// Default: true
    pub verify_checksums: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
            vector_size: STANDARD_VECTOR_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            parallel_scan_vector_count: ROW_GROUP_VECTOR_COUNT,
            verify_checksums: true,
        }
    }
}

impl StorageConfig {
    /// Creates a small configuration for testing.
    ///
    /// Row groups hold 1024 rows in vectors of 256 so that tests cross
    /// row-group and vector boundaries with few rows.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            row_group_size: 1024,
            vector_size: 256,
            block_size: MIN_BLOCK_SIZE,
            parallel_scan_vector_count: 4,
            verify_checksums: true,
        }
    }

    /// Sets the row group capacity.
    #[must_use]
    pub const fn with_row_group_size(mut self, rows: usize) -> Self {
        self.row_group_size = rows;
        self
    }

    /// Sets the vector size.
    #[must_use]
    pub const fn with_vector_size(mut self, rows: usize) -> Self {
        self.vector_size = rows;
        self
    }

    /// Sets the block size.
    #[must_use]
    pub const fn with_block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    /// Sets the number of vectors per parallel scan claim.
    #[must_use]
    pub const fn with_parallel_scan_vector_count(mut self, count: usize) -> Self {
        self.parallel_scan_vector_count = count;
        self
    }

    /// Enables or disables checksum verification.
    #[must_use]
    pub const fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Returns the number of vectors in one full row group.
    #[must_use]
    pub const fn vectors_per_row_group(&self) -> usize {
        self.row_group_size / self.vector_size
    }

    /// Returns the usable payload bytes of one block.
    #[must_use]
    pub const fn block_payload_size(&self) -> usize {
        self.block_size - BLOCK_HEADER_SIZE
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> QuarryResult<()> {
        if self.vector_size == 0 || !self.vector_size.is_power_of_two() {
            return Err(invalid("vector_size must be a power of 2"));
        }
        if self.row_group_size == 0 || self.row_group_size % self.vector_size != 0 {
            return Err(invalid(
                "row_group_size must be a positive multiple of vector_size",
            ));
        }
        if self.block_size < MIN_BLOCK_SIZE {
            return Err(invalid("block_size must be at least 4096 bytes"));
        }
        if self.parallel_scan_vector_count == 0 {
            return Err(invalid("parallel_scan_vector_count must be positive"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> QuarryError {
    QuarryError::InvalidConfig {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StorageConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.row_group_size, 122_880);
        assert_eq!(config.vectors_per_row_group(), 60);
    }

    #[test]
    fn test_invalid_config() {
        let config = StorageConfig::default().with_vector_size(1000);
        assert!(config.validate().is_err());

        let config = StorageConfig::default()
            .with_vector_size(1024)
            .with_row_group_size(1500);
        assert!(config.validate().is_err());

        let config = StorageConfig::default().with_block_size(512);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serde() {
        let config = StorageConfig::for_testing();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: StorageConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
