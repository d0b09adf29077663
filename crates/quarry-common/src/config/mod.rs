//! Configuration for Quarry.
//!
//! This module provides configuration structures for the storage engine.

mod storage;

pub use storage::StorageConfig;
