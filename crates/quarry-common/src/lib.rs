//! # quarry-common
//!
//! Common types, errors, and utilities for Quarry.
//!
//! This crate provides the foundational types shared by every Quarry
//! component. It includes:
//!
//! - **Types**: identifiers (`RowId`, `TransactionId`, `CommitId`, `BlockId`),
//!   logical types and values, and the columnar `Vector` / `DataChunk`
//! - **Errors**: unified error handling with `QuarryError`
//! - **Config**: storage configuration
//! - **Constants**: system-wide constants and limits
//! - **Codec**: the binary encoding of types and values shared by the
//!   write-ahead log and the checkpoint format
//!
//! ## Example
//!
//! ```rust
//! use quarry_common::types::{DataChunk, LogicalType, Value};
//! use quarry_common::error::QuarryResult;
//!
//! fn example() -> QuarryResult<()> {
//!     let chunk = DataChunk::from_rows(
//!         &[LogicalType::Integer, LogicalType::Varchar],
//!         &[vec![Value::Integer(1), Value::from("one")]],
//!     )?;
//!     assert_eq!(chunk.size(), 1);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::StorageConfig;
pub use constants::*;
pub use error::{QuarryError, QuarryResult};
pub use types::{
    BlockId, CommitId, DataChunk, LogicalType, RowId, TransactionData, TransactionId, Value,
    Vector,
};
