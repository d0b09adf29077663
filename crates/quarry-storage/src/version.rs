//! Per-row version metadata.
//!
//! Every row carries an insertion id and a deletion id, stored in atomic
//! arrays next to the row group so visibility checks stay lock-free. Both
//! ids hold either a transaction id (uncommitted) or a commit id
//! (committed); a deletion id of `NOT_DELETED_ID` means the row is live.
//!
//! The arrays are allocated lazily per vector on first append.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use quarry_common::constants::NOT_DELETED_ID;
use quarry_common::types::{is_committed_version, CommitId, TransactionData, TransactionId};

struct VectorVersions {
    inserted: Box<[AtomicU64]>,
    deleted: Box<[AtomicU64]>,
}

impl VectorVersions {
    fn new(size: usize) -> Self {
        let fill = || (0..size).map(|_| AtomicU64::new(NOT_DELETED_ID)).collect();
        Self {
            inserted: fill(),
            deleted: fill(),
        }
    }
}

/// Result of marking a row deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The row is now marked deleted by the caller.
    Deleted,
    /// The caller already deleted the row, or sees a committed deletion.
    AlreadyDeleted,
    /// Another transaction holds the row; carries its version.
    Conflict(u64),
}

/// Insertion and deletion ids of the rows of one row group.
pub struct VersionInfo {
    vector_size: usize,
    vectors: Box<[OnceLock<VectorVersions>]>,
}

impl VersionInfo {
    /// Creates version info for `capacity` rows.
    pub fn new(capacity: usize, vector_size: usize) -> Self {
        let vector_count = capacity.div_ceil(vector_size);
        Self {
            vector_size,
            vectors: (0..vector_count).map(|_| OnceLock::new()).collect(),
        }
    }

    /// Returns the number of rows the version info can describe.
    pub fn capacity(&self) -> usize {
        self.vectors.len() * self.vector_size
    }

    fn slot(&self, offset: usize) -> Option<(&VectorVersions, usize)> {
        let vector = self.vectors.get(offset / self.vector_size)?.get()?;
        Some((vector, offset % self.vector_size))
    }

    fn slot_or_init(&self, offset: usize) -> Option<(&VectorVersions, usize)> {
        let size = self.vector_size;
        let vector = self
            .vectors
            .get(offset / size)?
            .get_or_init(|| VectorVersions::new(size));
        Some((vector, offset % size))
    }

    /// Returns the insertion id of row `offset`.
    pub fn inserted(&self, offset: usize) -> u64 {
        self.slot(offset)
            .map_or(NOT_DELETED_ID, |(v, i)| v.inserted[i].load(Ordering::Acquire))
    }

    /// Returns the deletion id of row `offset`.
    pub fn deleted(&self, offset: usize) -> u64 {
        self.slot(offset)
            .map_or(NOT_DELETED_ID, |(v, i)| v.deleted[i].load(Ordering::Acquire))
    }

    /// Tags rows `[start, start + count)` as inserted by `version`.
    pub fn append(&self, version: u64, start: usize, count: usize) {
        for offset in start..start + count {
            if let Some((vector, i)) = self.slot_or_init(offset) {
                vector.deleted[i].store(NOT_DELETED_ID, Ordering::Relaxed);
                vector.inserted[i].store(version, Ordering::Release);
            }
        }
    }

    /// Stamps `commit_id` on the uncommitted insertions among rows
    /// `[start, start + count)` and returns how many were stamped.
    pub fn commit_append(&self, commit_id: CommitId, start: usize, count: usize) -> usize {
        let mut stamped = 0;
        for offset in start..start + count {
            if let Some((vector, i)) = self.slot(offset) {
                let inserted = vector.inserted[i].load(Ordering::Acquire);
                if inserted != NOT_DELETED_ID && !is_committed_version(inserted) {
                    vector.inserted[i].store(commit_id.as_u64(), Ordering::Release);
                    stamped += 1;
                }
            }
        }
        stamped
    }

    /// Makes rows `[start, start + count)` invisible to everyone.
    pub fn revert_append(&self, start: usize, count: usize) {
        for offset in start..start + count {
            if let Some((vector, i)) = self.slot(offset) {
                vector.inserted[i].store(NOT_DELETED_ID, Ordering::Release);
                vector.deleted[i].store(NOT_DELETED_ID, Ordering::Release);
            }
        }
    }

    /// Hides rows `[start, start + count)` from every reader for good.
    ///
    /// The rows read as inserted and deleted before any snapshot, so they
    /// keep their row ids but are never produced again.
    pub fn tombstone(&self, start: usize, count: usize) {
        let loaded = CommitId::LOADED.as_u64();
        for offset in start..start + count {
            if let Some((vector, i)) = self.slot(offset) {
                vector.deleted[i].store(loaded, Ordering::Release);
                vector.inserted[i].store(loaded, Ordering::Release);
            }
        }
    }

    /// Returns true if row `offset` was hidden by [`VersionInfo::tombstone`].
    pub fn is_tombstone(&self, offset: usize) -> bool {
        let loaded = CommitId::LOADED.as_u64();
        self.inserted(offset) == loaded && self.deleted(offset) == loaded
    }

    /// Returns true if row `offset` is visible to `view`.
    pub fn is_visible(&self, view: &TransactionData, offset: usize) -> bool {
        self.slot(offset).map_or(false, |(vector, i)| {
            view.is_visible(vector.inserted[i].load(Ordering::Acquire))
                && !view.is_visible(vector.deleted[i].load(Ordering::Acquire))
        })
    }

    /// Pushes the positions (relative to `start`) of the rows in
    /// `[start, start + count)` that `view` can see.
    pub fn visible_selection(
        &self,
        view: &TransactionData,
        start: usize,
        count: usize,
        selection: &mut Vec<usize>,
    ) {
        selection.clear();
        selection.extend((0..count).filter(|&i| self.is_visible(view, start + i)));
    }

    /// Marks row `offset` deleted by `txn`.
    pub fn delete(&self, txn: &TransactionData, offset: usize) -> DeleteOutcome {
        let Some((vector, i)) = self.slot(offset) else {
            return DeleteOutcome::Conflict(NOT_DELETED_ID);
        };
        let inserted = vector.inserted[i].load(Ordering::Acquire);
        if !txn.is_visible(inserted) {
            return DeleteOutcome::Conflict(inserted);
        }
        let own = txn.transaction_id.as_u64();
        match vector.deleted[i].compare_exchange(
            NOT_DELETED_ID,
            own,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => DeleteOutcome::Deleted,
            Err(current) if current == own => DeleteOutcome::AlreadyDeleted,
            Err(current) if is_committed_version(current) && txn.is_visible(current) => {
                DeleteOutcome::AlreadyDeleted
            }
            Err(current) => DeleteOutcome::Conflict(current),
        }
    }

    /// Clears the deletion mark `txn` placed on row `offset`.
    pub fn undo_delete(&self, offset: usize, txn: TransactionId) {
        if let Some((vector, i)) = self.slot(offset) {
            let _ = vector.deleted[i].compare_exchange(
                txn.as_u64(),
                NOT_DELETED_ID,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    /// Stamps `commit_id` on the deletion mark `txn` placed on row `offset`.
    pub fn commit_delete(&self, offset: usize, txn: TransactionId, commit_id: CommitId) {
        if let Some((vector, i)) = self.slot(offset) {
            let _ = vector.deleted[i].compare_exchange(
                txn.as_u64(),
                commit_id.as_u64(),
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    /// Marks row `offset` as deleted by a committed transaction.
    pub fn restore_delete(&self, offset: usize, commit_id: CommitId) {
        if let Some((vector, i)) = self.slot(offset) {
            vector.deleted[i].store(commit_id.as_u64(), Ordering::Release);
        }
    }

    /// Returns the length of the prefix of `[0, count)` whose insertion is
    /// committed.
    pub fn committed_prefix(&self, count: usize) -> usize {
        (0..count)
            .find(|&offset| !is_committed_version(self.inserted(offset)))
            .unwrap_or(count)
    }

    /// Returns true if row `offset` carries a committed deletion.
    pub fn is_deleted_committed(&self, offset: usize) -> bool {
        is_committed_version(self.deleted(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(start: u64, id: u64) -> TransactionData {
        TransactionData::new(CommitId::new(start), TransactionId::new(id))
    }

    #[test]
    fn test_append_visibility() {
        let versions = VersionInfo::new(1000, 256);
        assert_eq!(versions.capacity(), 1024);
        let writer = txn(5, 1);
        versions.append(writer.transaction_id.as_u64(), 250, 10);

        let mut selection = Vec::new();
        versions.visible_selection(&writer, 250, 10, &mut selection);
        assert_eq!(selection.len(), 10);
        versions.visible_selection(&txn(5, 2), 250, 10, &mut selection);
        assert!(selection.is_empty());

        assert_eq!(versions.commit_append(CommitId::new(5), 250, 10), 10);
        assert!(!versions.is_visible(&txn(5, 2), 255));
        assert!(versions.is_visible(&txn(6, 2), 255));
        assert!(!versions.is_visible(&txn(6, 2), 260));
    }

    #[test]
    fn test_delete_outcomes() {
        let versions = VersionInfo::new(8, 8);
        versions.append(1, 0, 4);
        let a = txn(5, 1);
        let b = txn(5, 2);

        assert_eq!(versions.delete(&a, 0), DeleteOutcome::Deleted);
        assert_eq!(versions.delete(&a, 0), DeleteOutcome::AlreadyDeleted);
        assert_eq!(versions.delete(&b, 0), DeleteOutcome::Conflict(a.transaction_id.as_u64()));

        versions.commit_delete(0, a.transaction_id, CommitId::new(5));
        // committed after b started
        assert_eq!(versions.delete(&b, 0), DeleteOutcome::Conflict(5));
        assert_eq!(versions.delete(&txn(6, 3), 0), DeleteOutcome::AlreadyDeleted);

        assert_eq!(versions.delete(&a, 1), DeleteOutcome::Deleted);
        versions.undo_delete(1, a.transaction_id);
        assert!(versions.is_visible(&b, 1));
        // never inserted
        assert!(matches!(versions.delete(&a, 6), DeleteOutcome::Conflict(_)));
    }

    #[test]
    fn test_committed_prefix_and_revert() {
        let versions = VersionInfo::new(16, 4);
        versions.append(0, 0, 6);
        versions.append(TransactionId::new(1).as_u64(), 6, 3);
        assert_eq!(versions.committed_prefix(9), 6);

        versions.revert_append(6, 3);
        assert!(!versions.is_visible(&TransactionData::latest(), 7));
        assert_eq!(versions.committed_prefix(6), 6);

        // reverted and committed rows are not stamped again
        assert_eq!(versions.commit_append(CommitId::new(3), 0, 9), 0);

        versions.restore_delete(2, CommitId::LOADED);
        assert!(versions.is_deleted_committed(2));
        assert!(!versions.is_visible(&txn(1, 1), 2));
    }

    #[test]
    fn test_tombstone_hides_rows_from_everyone() {
        let versions = VersionInfo::new(16, 4);
        let writer = txn(5, 1);
        versions.append(writer.transaction_id.as_u64(), 0, 8);
        versions.tombstone(2, 3);

        for view in [writer, txn(100, 2), TransactionData::latest(), TransactionData::committed()] {
            assert!(!versions.is_visible(&view, 3));
            assert!(versions.is_visible(&view, 5) == (view == writer || view == TransactionData::latest()));
        }
        assert!(versions.is_tombstone(4));
        assert!(!versions.is_tombstone(5));
        assert_eq!(versions.delete(&txn(100, 2), 3), DeleteOutcome::AlreadyDeleted);

        // the surrounding rows still commit, the tombstones do not
        assert_eq!(versions.commit_append(CommitId::new(6), 0, 8), 5);
        assert!(versions.is_visible(&txn(7, 2), 1));
        assert!(!versions.is_visible(&txn(7, 2), 2));
        assert_eq!(versions.committed_prefix(8), 8);
    }
}
