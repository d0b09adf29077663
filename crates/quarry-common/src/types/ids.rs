//! Core identifier types for Quarry.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of row offsets, transaction ids, commit ids
//! and block ids.
//!
//! Row versions are stored as raw `u64` values in a single id space: commit
//! ids occupy `[0, TRANSACTION_ID_START)` and transaction ids occupy
//! `[TRANSACTION_ID_START, u64::MAX)`. `u64::MAX` marks "never deleted".

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{INVALID_BLOCK, NOT_DELETED_ID, TRANSACTION_ID_START};

/// Row identifier - a global offset into a table.
///
/// Row ids are assigned densely at append time and never reused except
/// after an append is reverted.
///
/// # Example
///
/// ```rust
/// use quarry_common::types::RowId;
///
/// let row = RowId::new(42);
/// assert_eq!(row.as_u64(), 42);
/// assert_eq!(row.offset(2), RowId::new(44));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct RowId(u64);

impl RowId {
    /// Creates a new `RowId` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the row id as a `usize` index.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Returns the row id `delta` rows after this one.
    #[inline]
    #[must_use]
    pub const fn offset(self, delta: u64) -> Self {
        Self(self.0 + delta)
    }
}

impl fmt::Debug for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowId({})", self.0)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RowId {
    #[inline]
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

impl From<RowId> for u64 {
    #[inline]
    fn from(id: RowId) -> Self {
        id.0
    }
}

/// Transaction identifier - tags the rows an uncommitted transaction wrote.
///
/// Transaction ids always lie at or above `TRANSACTION_ID_START`, so a
/// version slot holding one is known to be uncommitted.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TransactionId(u64);

impl TransactionId {
    /// The first transaction id handed out.
    pub const FIRST: Self = Self(TRANSACTION_ID_START);

    /// Creates a new `TransactionId` from a raw u64 value.
    ///
    /// Values below `TRANSACTION_ID_START` are shifted into the
    /// transaction id space.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        if id < TRANSACTION_ID_START {
            Self(TRANSACTION_ID_START + id)
        } else {
            Self(id)
        }
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next transaction id.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.0 - TRANSACTION_ID_START)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0 - TRANSACTION_ID_START)
    }
}

/// Commit identifier - the position of a committed transaction in the
/// global commit order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct CommitId(u64);

impl CommitId {
    /// Commit id stamped on rows loaded from persistent storage.
    pub const LOADED: Self = Self(0);

    /// Creates a new `CommitId` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next commit id.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Checks that the commit id does not collide with the transaction id space.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 < TRANSACTION_ID_START
    }
}

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitId({})", self.0)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CommitId {
    #[inline]
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

/// Block identifier - addresses one fixed-size block of the block manager.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BlockId(u64);

impl BlockId {
    /// Invalid block ID constant, used as a sentinel value.
    pub const INVALID: Self = Self(INVALID_BLOCK);

    /// Creates a new `BlockId` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Checks if this is a valid block ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != INVALID_BLOCK
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "BlockId(INVALID)")
        } else {
            write!(f, "BlockId({})", self.0)
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BlockId {
    #[inline]
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

/// The part of a transaction the storage layer consults.
///
/// A version id `v` stored on a row is visible to the transaction iff
/// `v < start_time` (committed before the snapshot was taken) or
/// `v == transaction_id` (written by the transaction itself).
///
/// # Example
///
/// ```rust
/// use quarry_common::types::{CommitId, TransactionData, TransactionId};
///
/// let txn = TransactionData::new(CommitId::new(5), TransactionId::FIRST);
/// assert!(txn.is_visible(4));
/// assert!(!txn.is_visible(5));
/// assert!(txn.is_visible(TransactionId::FIRST.as_u64()));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionData {
    /// Snapshot point: every commit id below this value is visible.
    pub start_time: CommitId,
    /// Id tagging the transaction's own uncommitted writes.
    pub transaction_id: TransactionId,
}

impl TransactionData {
    /// Creates transaction data from a snapshot point and transaction id.
    #[inline]
    #[must_use]
    pub const fn new(start_time: CommitId, transaction_id: TransactionId) -> Self {
        Self {
            start_time,
            transaction_id,
        }
    }

    /// Returns a view that sees every committed version and nothing uncommitted.
    ///
    /// Used by checkpointing and index builds, which operate on committed data.
    #[inline]
    #[must_use]
    pub const fn committed() -> Self {
        Self {
            start_time: CommitId(TRANSACTION_ID_START),
            transaction_id: TransactionId(NOT_DELETED_ID - 1),
        }
    }

    /// Returns a view that sees the latest state of every row, including
    /// uncommitted inserts and deletes of any transaction.
    #[inline]
    #[must_use]
    pub const fn latest() -> Self {
        Self {
            start_time: CommitId(NOT_DELETED_ID),
            transaction_id: TransactionId(NOT_DELETED_ID - 1),
        }
    }

    /// Returns true if the given version id is visible to this transaction.
    #[inline]
    #[must_use]
    pub const fn is_visible(&self, version: u64) -> bool {
        version < self.start_time.0 || version == self.transaction_id.0
    }

    /// Returns true if the version was written by this transaction.
    #[inline]
    #[must_use]
    pub const fn is_own(&self, version: u64) -> bool {
        version == self.transaction_id.0
    }
}

/// Returns true if the version id belongs to a committed transaction.
#[inline]
#[must_use]
pub const fn is_committed_version(version: u64) -> bool {
    version < TRANSACTION_ID_START
}
