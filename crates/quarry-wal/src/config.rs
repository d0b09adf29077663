//! Log configuration.
//!
//! This module provides configuration options for the write-ahead log.

use quarry_common::constants::{LOG_RECORD_HEADER_SIZE, MAX_LOG_RECORD_SIZE};

use crate::error::{WalError, WalResult};

/// Sync policy for log writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// Sync after every record (safest, slowest).
    EveryWrite,
    /// Sync when the log is flushed.
    #[default]
    OnFlush,
    /// Never sync (fastest, unsafe - for testing only).
    Never,
}

/// Configuration for the write-ahead log.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Maximum size of a single encoded record.
    pub max_record_size: usize,

    /// Sync policy for durability.
    pub sync_policy: SyncPolicy,

    /// Whether to verify checksums on read.
    pub verify_checksums: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_record_size: MAX_LOG_RECORD_SIZE,
            sync_policy: SyncPolicy::default(),
            verify_checksums: true,
        }
    }
}

impl LogConfig {
    /// Creates a configuration suitable for tests.
    pub fn for_testing() -> Self {
        Self {
            sync_policy: SyncPolicy::Never,
            ..Default::default()
        }
    }

    /// Sets the maximum record size.
    #[must_use]
    pub fn with_max_record_size(mut self, size: usize) -> Self {
        self.max_record_size = size;
        self
    }

    /// Sets the sync policy.
    #[must_use]
    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    /// Sets whether checksums are verified on read.
    #[must_use]
    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> WalResult<()> {
        if self.max_record_size <= LOG_RECORD_HEADER_SIZE {
            return Err(WalError::config_error(
                "max_record_size must exceed the record header size",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = LogConfig::default()
            .with_sync_policy(SyncPolicy::EveryWrite)
            .with_max_record_size(1024);
        assert_eq!(config.sync_policy, SyncPolicy::EveryWrite);
        assert!(config.validate().is_ok());

        assert!(LogConfig::default().with_max_record_size(8).validate().is_err());
    }
}
