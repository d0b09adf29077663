//! Error handling for Quarry.
//!
//! This module provides a unified error type and result alias used
//! across all Quarry components.

mod database;

pub use database::{ErrorCode, QuarryError};

/// Result type alias for Quarry operations.
pub type QuarryResult<T> = std::result::Result<T, QuarryError>;
