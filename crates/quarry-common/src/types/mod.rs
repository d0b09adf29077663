//! Type definitions for Quarry.
//!
//! This module contains the identifier, value and columnar batch types used
//! across the storage engine.

mod chunk;
mod ids;
mod value;

pub use chunk::{DataChunk, Vector};
pub use ids::{is_committed_version, BlockId, CommitId, RowId, TransactionData, TransactionId};
pub use value::{LogicalType, Value};
