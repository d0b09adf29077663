//! # quarry-txn
//!
//! Transaction manager for Quarry.
//!
//! Supplies transaction ids, snapshot start times and commit ids, tracks
//! active transactions and reports the lowest active start time used to
//! garbage-collect old row versions.
//!
//! # Example Usage
//!
//! ```rust
//! use quarry_txn::TransactionManager;
//!
//! let manager = TransactionManager::new();
//! let mut txn = manager.begin();
//! // ... append / delete / update through table storage using txn.data() ...
//! let commit_id = manager.commit(&mut txn).unwrap();
//! assert!(commit_id.is_valid());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Transaction lifecycle management.
///
/// This module provides:
/// - [`manager::TransactionManager`]: Main coordinator for transactions
/// - [`manager::Transaction`]: Transaction handle and state
/// - [`manager::TransactionState`]: Transaction lifecycle states
pub mod manager;

// Re-export commonly used types
pub use manager::{
    Transaction, TransactionError, TransactionManager, TransactionState, TransactionStats,
    TxnResult,
};
