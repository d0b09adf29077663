//! The physical table.
//!
//! A [`DataTable`] owns the row groups of one generation of a logical table
//! and drives every operation on them: appends, scans, fetches, deletes,
//! updates, index maintenance, checkpoints and schema changes.
//!
//! # Generations
//!
//! Schema changes build a new generation on top of the current root (see
//! [`DataTable::add_column`]). All generations share one
//! [`DataTableInfo`]; only the root accepts writes.
//!
//! # Locking
//!
//! ```text
//! append_lock ──▶ column_stats
//!             ──▶ index list lock ──▶ per-index lock
//! ```
//!
//! Locks are only taken in the direction of the arrows. Readers never take
//! the append lock: `total_rows`, row-group counts and version ids are
//! atomics published after the data they describe.

mod alter;
mod append;
mod checkpoint;
mod modify;
mod scan;
pub(crate) mod undo;

pub use checkpoint::ColumnSegmentInfo;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use quarry_common::constants::COLUMN_IDENTIFIER_ROW_ID;
use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{CommitId, LogicalType, TransactionId, Value};
use quarry_wal::WriteAheadLog;
use tracing::debug;

use crate::info::DataTableInfo;
use crate::row_group::RowGroup;
use crate::segment_tree::{SegmentNode, SegmentTree};
use crate::statistics::ColumnStatistics;
use undo::UndoEntry;

/// One generation of a table's storage.
pub struct DataTable {
    info: Arc<DataTableInfo>,
    types: Vec<LogicalType>,
    /// Rows appended so far, committed or not.
    total_rows: AtomicU64,
    row_groups: SegmentTree<RowGroup>,
    column_stats: Mutex<Vec<ColumnStatistics>>,
    is_root: AtomicBool,
    append_lock: Mutex<()>,
}

impl DataTable {
    /// Creates an empty root table with the given column types.
    pub fn new(info: Arc<DataTableInfo>, types: Vec<LogicalType>) -> QuarryResult<Self> {
        if types.is_empty() {
            return Err(QuarryError::invalid_argument(format!(
                "table '{}' needs at least one column",
                info.qualified_name()
            )));
        }
        let stats = types.iter().cloned().map(ColumnStatistics::new).collect();
        Ok(Self::from_parts(info, types, Vec::new(), stats, true))
    }

    pub(crate) fn from_parts(
        info: Arc<DataTableInfo>,
        types: Vec<LogicalType>,
        row_groups: Vec<Arc<RowGroup>>,
        column_stats: Vec<ColumnStatistics>,
        is_root: bool,
    ) -> Self {
        let total_rows = row_groups
            .last()
            .map_or(0, |rg| rg.start() + rg.count() as u64);
        Self {
            info,
            types,
            total_rows: AtomicU64::new(total_rows),
            row_groups: SegmentTree::from_nodes(row_groups),
            column_stats: Mutex::new(column_stats),
            is_root: AtomicBool::new(is_root),
            append_lock: Mutex::new(()),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the shared table identity.
    pub fn info(&self) -> &Arc<DataTableInfo> {
        &self.info
    }

    /// Returns the column types.
    pub fn types(&self) -> &[LogicalType] {
        &self.types
    }

    /// Returns the number of columns.
    pub fn column_count(&self) -> usize {
        self.types.len()
    }

    /// Returns the number of appended rows, including uncommitted ones.
    pub fn total_rows(&self) -> u64 {
        self.total_rows.load(Ordering::Acquire)
    }

    /// Returns a snapshot of the row groups.
    pub fn row_groups(&self) -> Vec<Arc<RowGroup>> {
        self.row_groups.snapshot()
    }

    /// Returns the number of row groups.
    pub fn row_group_count(&self) -> usize {
        self.row_groups.len()
    }

    /// Returns true if this generation accepts writes.
    pub fn is_root(&self) -> bool {
        self.is_root.load(Ordering::Acquire)
    }

    /// Installs this generation as the root of its table.
    pub fn set_as_root(&self) {
        self.is_root.store(true, Ordering::Release);
        debug!(table = %self.info.qualified_name(), "generation installed as root");
    }

    pub(crate) fn freeze(&self) {
        self.is_root.store(false, Ordering::Release);
    }

    pub(crate) fn ensure_root(&self, operation: &'static str) -> QuarryResult<()> {
        if self.is_root() {
            Ok(())
        } else {
            Err(QuarryError::NotRoot {
                table: self.info.qualified_name(),
                operation,
            })
        }
    }

    pub(crate) fn check_column(&self, column: usize) -> QuarryResult<&LogicalType> {
        self.types.get(column).ok_or_else(|| {
            QuarryError::invalid_argument(format!(
                "column {} out of range for table '{}' ({} columns)",
                column,
                self.info.qualified_name(),
                self.types.len()
            ))
        })
    }

    /// Returns the output types of a scan or fetch of `column_ids`.
    pub(crate) fn output_types(&self, column_ids: &[usize]) -> QuarryResult<Vec<LogicalType>> {
        column_ids
            .iter()
            .map(|&id| {
                if id == COLUMN_IDENTIFIER_ROW_ID {
                    Ok(LogicalType::BigInt)
                } else {
                    self.check_column(id).cloned()
                }
            })
            .collect()
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Returns statistics of column `column` covering every appended and
    /// updated value.
    pub fn get_statistics(&self, column: usize) -> QuarryResult<ColumnStatistics> {
        self.check_column(column)?;
        let mut stats = self.column_stats.lock()[column].clone();
        for row_group in self.row_groups.snapshot() {
            if row_group.columns()[column].is_derived() {
                row_group.merge_statistics(column, &mut stats)?;
            }
        }
        Ok(stats)
    }

    pub(crate) fn merge_stats(&self, column: usize, values: &[Value]) {
        if let Some(stats) = self.column_stats.lock().get_mut(column) {
            stats.update_all(values);
        }
    }

    // =========================================================================
    // Transaction Completion
    // =========================================================================

    /// Stamps `commit_id` on the deletes and updates of `txn`.
    ///
    /// Index entries of the deleted rows and the keys updated rows no longer
    /// hold are removed. Returns the number of changes committed.
    pub fn commit_transaction(&self, txn: TransactionId, commit_id: CommitId) -> usize {
        let entries = self.info.undo().take(txn);
        for entry in &entries {
            match entry {
                UndoEntry::Delete { rows, index_keys } => {
                    for row in rows {
                        row.row_group
                            .versions()
                            .commit_delete(row.offset, txn, commit_id);
                    }
                    let row_ids = entry.row_ids();
                    for (index, keys) in index_keys {
                        index.delete(keys, &row_ids);
                    }
                }
                UndoEntry::Update {
                    segments,
                    row_ids,
                    index_changes,
                    ..
                } => {
                    for (segment, offsets) in segments {
                        segment.commit_updates(offsets, txn, commit_id);
                    }
                    for change in index_changes {
                        change.index.delete(&change.old_keys, row_ids);
                    }
                }
            }
        }
        if !entries.is_empty() {
            debug!(
                table = %self.info.qualified_name(),
                txn = %txn,
                commit_id = %commit_id,
                changes = entries.len(),
                "committed deletes and updates"
            );
        }
        entries.len()
    }

    /// Discards the deletes and updates of `txn`, newest first.
    ///
    /// Deleted rows become visible again under the index entries they kept;
    /// updated values are restored and their new keys removed.
    pub fn rollback_transaction(&self, txn: TransactionId) -> usize {
        let entries = self.info.undo().take(txn);
        for entry in entries.iter().rev() {
            match entry {
                UndoEntry::Delete { rows, .. } => {
                    for row in rows {
                        row.row_group.versions().undo_delete(row.offset, txn);
                    }
                }
                UndoEntry::Update {
                    segments,
                    row_ids,
                    index_changes,
                    ..
                } => {
                    for change in index_changes {
                        change.index.delete(&change.new_keys, row_ids);
                    }
                    for (segment, offsets) in segments {
                        segment.rollback_updates(offsets, txn);
                    }
                }
            }
        }
        if !entries.is_empty() {
            debug!(
                table = %self.info.qualified_name(),
                txn = %txn,
                changes = entries.len(),
                "rolled back deletes and updates"
            );
        }
        entries.len()
    }

    /// Drops update undo entries older than every active snapshot.
    pub fn cleanup_versions(&self, lowest_active_start: CommitId) -> usize {
        self.row_groups
            .snapshot()
            .iter()
            .map(|row_group| row_group.cleanup_versions(lowest_active_start))
            .sum()
    }

    /// Logs the deletes and updates of `txn`.
    ///
    /// Must run before [`DataTable::commit_transaction`], which forgets them.
    pub fn write_transaction_to_log(
        &self,
        txn: TransactionId,
        log: &dyn WriteAheadLog,
    ) -> QuarryResult<()> {
        if self.info.is_temporary() {
            return Ok(());
        }
        self.info.undo().with_entries(txn, |entries| -> QuarryResult<()> {
            if entries.is_empty() {
                return Ok(());
            }
            log.write_set_table(self.info.schema(), self.info.table())?;
            for entry in entries {
                match entry {
                    UndoEntry::Delete { .. } => log.write_delete(&entry.row_ids())?,
                    UndoEntry::Update {
                        column_path,
                        row_ids,
                        values,
                        ..
                    } => log.write_update(column_path, row_ids, values)?,
                }
            }
            Ok(())
        })
    }
}

impl fmt::Debug for DataTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTable")
            .field("table", &self.info.qualified_name())
            .field("types", &self.types)
            .field("total_rows", &self.total_rows())
            .field("row_groups", &self.row_groups.len())
            .field("is_root", &self.is_root())
            .finish()
    }
}
