//! Per-operation cursors.
//!
//! The execution engine drives a table exclusively through these states.
//! They are owned by one caller and must not be shared between
//! transactions or threads.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::MutexGuard;
use quarry_common::error::QuarryResult;
use quarry_common::types::{CommitId, TransactionData};
use tracing::warn;

use crate::filter::TableFilterSet;
use crate::row_group::RowGroup;
use crate::table::DataTable;

// =============================================================================
// Sequential Scan
// =============================================================================

/// Cursor of a sequential scan.
#[derive(Debug)]
pub struct TableScanState {
    pub(crate) column_ids: Vec<usize>,
    pub(crate) filters: Option<TableFilterSet>,
    pub(crate) row_groups: Vec<Arc<RowGroup>>,
    pub(crate) current: usize,
    pub(crate) vector_index: usize,
    pub(crate) vector_end: Option<usize>,
    pub(crate) row_range: Range<u64>,
    pub(crate) transaction: Option<TransactionData>,
    pub(crate) check_versions: bool,
    pub(crate) selection: Vec<usize>,
    pub(crate) rows_scanned: u64,
    pub(crate) row_groups_skipped: u64,
    pub(crate) zonemap_checked: bool,
}

impl TableScanState {
    pub(crate) fn new(
        column_ids: Vec<usize>,
        filters: Option<TableFilterSet>,
        row_groups: Vec<Arc<RowGroup>>,
        row_range: Range<u64>,
    ) -> Self {
        Self {
            column_ids,
            filters: filters.filter(|f| !f.is_empty()),
            row_groups,
            current: 0,
            vector_index: 0,
            vector_end: None,
            row_range,
            transaction: None,
            check_versions: true,
            selection: Vec::new(),
            rows_scanned: 0,
            row_groups_skipped: 0,
            zonemap_checked: false,
        }
    }

    /// Returns the scanned column ids.
    pub fn column_ids(&self) -> &[usize] {
        &self.column_ids
    }

    /// Returns the pushed-down filters.
    pub fn filters(&self) -> Option<&TableFilterSet> {
        self.filters.as_ref()
    }

    /// Returns the transaction the scan is bound to, if any.
    pub fn transaction(&self) -> Option<&TransactionData> {
        self.transaction.as_ref()
    }

    /// Returns the number of rows produced so far.
    pub fn rows_scanned(&self) -> u64 {
        self.rows_scanned
    }

    /// Returns the number of row groups skipped by zone-map pruning.
    pub fn row_groups_skipped(&self) -> u64 {
        self.row_groups_skipped
    }

    /// Points the cursor at one claimed work unit of a parallel scan.
    pub(crate) fn assign(&mut self, unit: &ScanUnit) {
        self.row_groups = vec![Arc::clone(&unit.row_group)];
        self.current = 0;
        self.vector_index = unit.vectors.start;
        self.vector_end = Some(unit.vectors.end);
        self.zonemap_checked = false;
    }

    /// Moves the cursor to the start of the next row group.
    pub(crate) fn next_row_group(&mut self) {
        self.current += 1;
        self.vector_index = 0;
        self.vector_end = None;
        self.zonemap_checked = false;
    }
}

// =============================================================================
// Append
// =============================================================================

/// An in-flight append.
///
/// Holds the table's append lock from [`DataTable::initialize_append`]
/// until the state is committed, reverted, finished or dropped. Dropping an
/// unfinished state reverts its rows.
pub struct TableAppendState<'a> {
    pub(crate) table: &'a DataTable,
    pub(crate) transaction: TransactionData,
    pub(crate) row_start: u64,
    pub(crate) current_row: u64,
    pub(crate) reserved: usize,
    pub(crate) finished: bool,
    pub(crate) _lock: MutexGuard<'a, ()>,
}

impl TableAppendState<'_> {
    /// Returns the row id of the first appended row.
    pub fn row_start(&self) -> u64 {
        self.row_start
    }

    /// Returns the row id the next appended row will receive.
    pub fn current_row(&self) -> u64 {
        self.current_row
    }

    /// Returns the number of rows appended through this state.
    pub fn appended(&self) -> usize {
        (self.current_row - self.row_start) as usize
    }

    /// Returns the number of rows reserved at initialization.
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Returns the appending transaction.
    pub fn transaction(&self) -> &TransactionData {
        &self.transaction
    }

    /// Commits every row appended through this state.
    pub fn commit(mut self, commit_id: CommitId) {
        self.finished = true;
        self.table
            .commit_append(commit_id, self.row_start, self.appended());
    }

    /// Reverts every row appended through this state.
    pub fn revert(mut self) -> QuarryResult<()> {
        self.finished = true;
        self.table
            .revert_append_internal(self.row_start, self.appended())
    }

    /// Releases the append lock, leaving the rows uncommitted.
    ///
    /// Returns the appended range `(row_start, count)`; the caller later
    /// passes it to [`DataTable::commit_append`] or
    /// [`DataTable::revert_append`].
    pub fn finish(mut self) -> (u64, usize) {
        self.finished = true;
        (self.row_start, self.appended())
    }
}

impl Drop for TableAppendState<'_> {
    fn drop(&mut self) {
        if self.finished || self.current_row == self.row_start {
            return;
        }
        warn!(
            table = %self.table.info().qualified_name(),
            row_start = self.row_start,
            count = self.appended(),
            "reverting unfinished append"
        );
        if let Err(e) = self
            .table
            .revert_append_internal(self.row_start, self.appended())
        {
            warn!(error = %e, "failed to revert unfinished append");
        }
    }
}

// =============================================================================
// Parallel Scan
// =============================================================================

/// A contiguous vector range of one row group.
#[derive(Debug, Clone)]
pub(crate) struct ScanUnit {
    pub row_group: Arc<RowGroup>,
    pub vectors: Range<usize>,
}

/// Work shared by the workers of a parallel scan.
///
/// Each call to [`crate::DataTable::next_parallel_scan`] claims the next
/// unclaimed unit with one atomic increment, so every unit is scanned by
/// exactly one worker.
#[derive(Debug)]
pub struct ParallelTableScanState {
    pub(crate) column_ids: Vec<usize>,
    pub(crate) filters: Option<TableFilterSet>,
    pub(crate) units: Vec<ScanUnit>,
    pub(crate) next: AtomicUsize,
    pub(crate) max_row: u64,
}

impl ParallelTableScanState {
    /// Returns the number of work units.
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Returns the number of units not yet claimed.
    pub fn remaining(&self) -> usize {
        self.units
            .len()
            .saturating_sub(self.next.load(Ordering::Acquire))
    }

    pub(crate) fn claim(&self) -> Option<&ScanUnit> {
        let index = self.next.fetch_add(1, Ordering::AcqRel);
        self.units.get(index)
    }
}

// =============================================================================
// Fetch
// =============================================================================

/// Cursor reused across fetches by row id.
#[derive(Debug, Default)]
pub struct ColumnFetchState {
    pub(crate) row_group: Option<Arc<RowGroup>>,
    pub(crate) rows_fetched: u64,
}

impl ColumnFetchState {
    /// Creates a fresh fetch state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of visible rows fetched so far.
    pub fn rows_fetched(&self) -> u64 {
        self.rows_fetched
    }
}

// =============================================================================
// Create Index Scan
// =============================================================================

/// Which rows a create-index scan produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableScanType {
    /// Committed rows that are not deleted by a committed transaction.
    CommittedRows,
    /// The latest state of every row, uncommitted changes included.
    LatestRows,
}

/// A scan that holds the table's append lock until dropped.
///
/// No rows are appended or reverted while it is alive, so an index built
/// from it sees a stable set of rows.
pub struct CreateIndexScanState<'a> {
    pub(crate) scan: TableScanState,
    pub(crate) view: TransactionData,
    pub(crate) scan_type: TableScanType,
    pub(crate) _lock: MutexGuard<'a, ()>,
}

impl CreateIndexScanState<'_> {
    /// Returns the scan type.
    pub fn scan_type(&self) -> TableScanType {
        self.scan_type
    }

    /// Returns the underlying cursor.
    pub fn scan_state(&self) -> &TableScanState {
        &self.scan
    }
}
