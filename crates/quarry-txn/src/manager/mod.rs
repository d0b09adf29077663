//! Transaction manager for coordinating transaction lifecycle.
//!
//! The manager hands out transaction ids, snapshot start times and commit
//! ids. Table storage consults only the resulting [`TransactionData`]; the
//! manager never touches table data itself.
//!
//! # Transaction States
//!
//! ```text
//! ┌───────┐    begin()    ┌────────┐
//! │ Start │──────────────▶│ Active │
//! └───────┘               └────────┘
//!                              │
//!                    ┌────────┴────────┐
//!                    │                 │
//!               commit()           abort()
//!                    │                 │
//!                    ▼                 ▼
//!             ┌───────────┐     ┌──────────┐
//!             │ Committed │     │ Aborted  │
//!             └───────────┘     └──────────┘
//! ```
//!
//! Commits are serialized: the commit id is assigned and the caller's
//! commit work runs under one lock, and new transactions take their start
//! time under the same lock. A transaction therefore never observes a
//! commit whose effects are only partially stamped.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use quarry_common::constants::TRANSACTION_ID_START;
use quarry_common::error::QuarryError;
use quarry_common::types::{CommitId, TransactionData, TransactionId};

/// The state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

impl TransactionState {
    /// Returns true if the transaction can perform operations.
    pub fn is_active(&self) -> bool {
        *self == TransactionState::Active
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Active => write!(f, "Active"),
            TransactionState::Committed => write!(f, "Committed"),
            TransactionState::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Errors raised by the transaction manager.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Transaction is not known to the manager.
    #[error("transaction not found: {0}")]
    NotFound(TransactionId),

    /// Transaction is not in the expected state.
    #[error("transaction {txn_id} is {current}, expected {expected}")]
    InvalidState {
        /// The transaction.
        txn_id: TransactionId,
        /// Its current state.
        current: TransactionState,
        /// The state the operation requires.
        expected: &'static str,
    },

    /// The commit id space is exhausted.
    #[error("commit id space exhausted")]
    CommitIdsExhausted,
}

/// Result type for transaction operations.
pub type TxnResult<T> = Result<T, TransactionError>;

impl From<TransactionError> for QuarryError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::CommitIdsExhausted => QuarryError::internal(err.to_string()),
            other => QuarryError::invalid_argument(other.to_string()),
        }
    }
}

/// A transaction handle.
#[derive(Debug)]
pub struct Transaction {
    data: TransactionData,
    state: TransactionState,
    commit_id: Option<CommitId>,
}

impl Transaction {
    /// Returns the transaction id.
    pub fn id(&self) -> TransactionId {
        self.data.transaction_id
    }

    /// Returns the snapshot start time.
    pub fn start_time(&self) -> CommitId {
        self.data.start_time
    }

    /// Returns the data consulted by table storage.
    pub fn data(&self) -> TransactionData {
        self.data
    }

    /// Returns the current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns the commit id once committed.
    pub fn commit_id(&self) -> Option<CommitId> {
        self.commit_id
    }

    fn ensure_active(&self) -> TxnResult<()> {
        if !self.state.is_active() {
            return Err(TransactionError::InvalidState {
                txn_id: self.id(),
                current: self.state,
                expected: "Active",
            });
        }
        Ok(())
    }
}

/// Transaction statistics.
#[derive(Debug, Default)]
pub struct TransactionStats {
    /// Total transactions started.
    pub started: AtomicU64,
    /// Total transactions committed.
    pub committed: AtomicU64,
    /// Total transactions aborted.
    pub aborted: AtomicU64,
}

struct CommitState {
    /// Next commit id; also the start time of new transactions.
    next_commit: u64,
    /// Start time of every active transaction.
    active: BTreeMap<TransactionId, CommitId>,
}

/// Coordinates transaction ids, start times and commit ids.
///
/// # Example
///
/// ```rust
/// use quarry_txn::TransactionManager;
///
/// let manager = TransactionManager::new();
/// let mut writer = manager.begin();
/// let reader = manager.begin();
/// let commit_id = manager.commit(&mut writer).unwrap();
///
/// // The reader's snapshot predates the commit.
/// assert!(!reader.data().is_visible(commit_id.as_u64()));
/// assert!(manager.begin().data().is_visible(commit_id.as_u64()));
/// ```
pub struct TransactionManager {
    state: Mutex<CommitState>,
    next_txn_id: AtomicU64,
    stats: TransactionStats,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    /// Creates a manager whose first commit id is 1.
    ///
    /// Commit id 0 is reserved for data loaded from persistent storage.
    pub fn new() -> Self {
        Self::starting_at(CommitId::new(1))
    }

    /// Creates a manager whose next commit id is `next_commit`.
    pub fn starting_at(next_commit: CommitId) -> Self {
        Self {
            state: Mutex::new(CommitState {
                next_commit: next_commit.as_u64(),
                active: BTreeMap::new(),
            }),
            next_txn_id: AtomicU64::new(TRANSACTION_ID_START),
            stats: TransactionStats::default(),
        }
    }

    /// Begins a new transaction.
    pub fn begin(&self) -> Transaction {
        let txn_id = TransactionId::new(self.next_txn_id.fetch_add(1, Ordering::Relaxed));
        let mut state = self.state.lock();
        let start_time = CommitId::new(state.next_commit);
        state.active.insert(txn_id, start_time);
        drop(state);

        self.stats.started.fetch_add(1, Ordering::Relaxed);
        debug!(txn = %txn_id, start_time = %start_time, "transaction started");
        Transaction {
            data: TransactionData::new(start_time, txn_id),
            state: TransactionState::Active,
            commit_id: None,
        }
    }

    /// Commits a transaction and returns its commit id.
    pub fn commit(&self, txn: &mut Transaction) -> TxnResult<CommitId> {
        self.commit_with(txn, |_| Ok::<(), TransactionError>(()))
    }

    /// Commits a transaction, running `apply` with the assigned commit id
    /// while commits are serialized.
    ///
    /// `apply` stamps the commit id onto the transaction's changes. If it
    /// fails the commit id is not consumed and the transaction stays active
    /// so the caller can abort it.
    pub fn commit_with<F, E>(&self, txn: &mut Transaction, apply: F) -> Result<CommitId, E>
    where
        F: FnOnce(CommitId) -> Result<(), E>,
        E: From<TransactionError>,
    {
        txn.ensure_active()?;
        let mut state = self.state.lock();
        if !state.active.contains_key(&txn.id()) {
            return Err(TransactionError::NotFound(txn.id()).into());
        }
        let commit_id = CommitId::new(state.next_commit);
        if !commit_id.is_valid() {
            return Err(TransactionError::CommitIdsExhausted.into());
        }

        apply(commit_id)?;

        state.next_commit += 1;
        state.active.remove(&txn.id());
        drop(state);

        txn.state = TransactionState::Committed;
        txn.commit_id = Some(commit_id);
        self.stats.committed.fetch_add(1, Ordering::Relaxed);
        debug!(txn = %txn.id(), commit_id = %commit_id, "transaction committed");
        Ok(commit_id)
    }

    /// Aborts a transaction.
    ///
    /// The caller is responsible for reverting the transaction's changes in
    /// table storage.
    pub fn abort(&self, txn: &mut Transaction) -> TxnResult<()> {
        txn.ensure_active()?;
        if self.state.lock().active.remove(&txn.id()).is_none() {
            return Err(TransactionError::NotFound(txn.id()));
        }
        txn.state = TransactionState::Aborted;
        self.stats.aborted.fetch_add(1, Ordering::Relaxed);
        debug!(txn = %txn.id(), "transaction aborted");
        Ok(())
    }

    /// Returns the lowest start time among active transactions.
    ///
    /// With no active transactions this is the next commit id: every
    /// committed version is visible to every future transaction.
    pub fn lowest_active_start(&self) -> CommitId {
        let state = self.state.lock();
        state
            .active
            .values()
            .min()
            .copied()
            .unwrap_or(CommitId::new(state.next_commit))
    }

    /// Returns the number of active transactions.
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Returns the commit id the next commit will receive.
    pub fn next_commit_id(&self) -> CommitId {
        CommitId::new(self.state.lock().next_commit)
    }

    /// Returns transaction statistics.
    pub fn stats(&self) -> &TransactionStats {
        &self.stats
    }
}
