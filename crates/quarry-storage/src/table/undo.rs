//! Per-transaction record of deletes and updates.
//!
//! Appends are committed and reverted through their own protocol; deletes
//! and updates are remembered here until the owning transaction commits or
//! rolls back.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use quarry_common::types::{DataChunk, RowId, TransactionId, Vector};

use crate::index::Index;
use crate::row_group::RowGroup;
use crate::segment::ColumnSegment;

/// A row marked deleted by a transaction.
pub(crate) struct DeletedRow {
    pub row_group: Arc<RowGroup>,
    pub offset: usize,
    pub row_id: RowId,
}

/// Keys of one index before and after an update.
///
/// Both are present in the index while the update is pending; commit drops
/// `old_keys`, rollback drops `new_keys`.
pub(crate) struct IndexChange {
    pub index: Arc<dyn Index>,
    pub old_keys: DataChunk,
    pub new_keys: DataChunk,
}

/// One undoable change.
pub(crate) enum UndoEntry {
    Delete {
        rows: Vec<DeletedRow>,
        /// Keys of the rows in each index, aligned with `rows`. Removed from
        /// the index on commit.
        index_keys: Vec<(Arc<dyn Index>, DataChunk)>,
    },
    Update {
        /// Updated offsets per touched segment.
        segments: Vec<(Arc<ColumnSegment>, Vec<usize>)>,
        column_path: Vec<usize>,
        row_ids: Vec<RowId>,
        values: Vector,
        index_changes: Vec<IndexChange>,
    },
}

impl UndoEntry {
    pub(crate) fn row_ids(&self) -> Vec<RowId> {
        match self {
            Self::Delete { rows, .. } => rows.iter().map(|row| row.row_id).collect(),
            Self::Update { row_ids, .. } => row_ids.clone(),
        }
    }
}

/// Undo entries keyed by transaction, oldest first.
#[derive(Default)]
pub(crate) struct UndoBuffer {
    entries: Mutex<HashMap<TransactionId, Vec<UndoEntry>>>,
}

impl UndoBuffer {
    pub(crate) fn push(&self, txn: TransactionId, entry: UndoEntry) {
        self.entries.lock().entry(txn).or_default().push(entry);
    }

    pub(crate) fn take(&self, txn: TransactionId) -> Vec<UndoEntry> {
        self.entries.lock().remove(&txn).unwrap_or_default()
    }

    /// Runs `f` over the entries of `txn` without removing them.
    pub(crate) fn with_entries<R>(&self, txn: TransactionId, f: impl FnOnce(&[UndoEntry]) -> R) -> R {
        let entries = self.entries.lock();
        f(entries.get(&txn).map_or(&[], Vec::as_slice))
    }

    pub(crate) fn pending_transactions(&self) -> usize {
        self.entries.lock().len()
    }
}
