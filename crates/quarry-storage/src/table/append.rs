//! The append protocol.
//!
//! ```text
//! initialize_append ──▶ append* ──▶ append_to_indexes ──▶ write_to_log
//!                                                             │
//!                                          commit_append ◀────┴────▶ revert_append
//! ```
//!
//! The append lock serializes appends while rows are written and indexed.
//! Rows are tagged with the appending transaction's id and become visible to
//! others only once [`DataTable::commit_append`] stamps a commit id on them.
//!
//! [`DataTable::insert`] releases the lock before the caller logs and
//! commits, so another append may land after rows that are still pending.
//! Reverting rows at the tail truncates the table; reverting rows with later
//! rows behind them hides them in place.

use std::ptr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{is_committed_version, CommitId, DataChunk, RowId, TransactionData};
use quarry_wal::WriteAheadLog;
use tracing::{debug, warn};

use super::DataTable;
use crate::constraints::TableConstraints;
use crate::index::Index;
use crate::row_group::RowGroup;
use crate::segment_tree::SegmentNode;
use crate::state::TableAppendState;

impl DataTable {
    /// Checks `chunk` against the column types and the table's constraints.
    pub fn verify_append_constraints(
        &self,
        constraints: &dyn TableConstraints,
        chunk: &DataChunk,
    ) -> QuarryResult<()> {
        chunk.verify_types(&self.types)?;
        constraints.verify_append(chunk)
    }

    /// Starts an append of about `append_count` rows on behalf of `txn`.
    ///
    /// Blocks until no other append is in flight.
    pub fn initialize_append(
        &self,
        txn: &TransactionData,
        append_count: usize,
    ) -> QuarryResult<TableAppendState<'_>> {
        let lock = self.append_lock.lock();
        self.ensure_root("appended to")?;
        let row_start = self.total_rows();
        if self.row_groups.last().map_or(true, |tail| tail.is_full()) {
            self.append_row_group(row_start);
        }
        debug!(
            table = %self.info.qualified_name(),
            txn = %txn.transaction_id,
            row_start,
            append_count,
            "append initialized"
        );
        Ok(TableAppendState {
            table: self,
            transaction: *txn,
            row_start,
            current_row: row_start,
            reserved: append_count,
            finished: false,
            _lock: lock,
        })
    }

    fn append_row_group(&self, start: u64) -> Arc<RowGroup> {
        let config = self.info.config();
        let row_group = Arc::new(RowGroup::new(
            start,
            config.row_group_size,
            config.vector_size,
            &self.types,
        ));
        self.row_groups.append(Arc::clone(&row_group));
        debug!(
            table = %self.info.qualified_name(),
            start,
            row_groups = self.row_groups.len(),
            "row group added"
        );
        row_group
    }

    /// Appends `chunk` through `state`.
    ///
    /// Rows that were written before a failure stay appended; the caller
    /// reverts the whole append.
    pub fn append(&self, chunk: &DataChunk, state: &mut TableAppendState<'_>) -> QuarryResult<()> {
        if !ptr::eq(state.table, self) {
            return Err(QuarryError::invalid_argument(
                "append state belongs to another table",
            ));
        }
        chunk.verify_types(&self.types)?;
        let version = state.transaction.transaction_id.as_u64();
        let mut chunk_offset = 0;
        while chunk_offset < chunk.size() {
            let row_group = match self.row_groups.last() {
                Some(tail) if !tail.is_full() => tail,
                _ => self.append_row_group(state.current_row),
            };
            let space = row_group.capacity() - row_group.count();
            let count = space.min(chunk.size() - chunk_offset);
            row_group.append(version, chunk, chunk_offset, count)?;
            chunk_offset += count;
            state.current_row += count as u64;
            self.total_rows.store(state.current_row, Ordering::Release);
        }
        for (column, vector) in chunk.columns().iter().enumerate() {
            self.merge_stats(column, vector.values());
        }
        Ok(())
    }

    /// Inserts the rows of `chunk`, numbered from `row_start`, into every
    /// index.
    ///
    /// On failure the entries already added to earlier indexes are removed
    /// again and the error is returned; the caller must revert the append.
    pub fn append_to_indexes(&self, chunk: &DataChunk, row_start: u64) -> QuarryResult<()> {
        let row_ids = row_ids(row_start, chunk.size());
        let mut done: Vec<(Arc<dyn Index>, DataChunk)> = Vec::new();
        let mut failure = None;
        self.info.indexes().scan(|index| {
            let result = chunk
                .project(index.column_ids())
                .and_then(|keys| index.append(&keys, &row_ids).map(|()| keys));
            match result {
                Ok(keys) => {
                    done.push((Arc::clone(index), keys));
                    false
                }
                Err(e) => {
                    warn!(
                        table = %self.info.qualified_name(),
                        index = %index.name(),
                        row_start,
                        error = %e,
                        "index insertion failed"
                    );
                    failure = Some(e);
                    true
                }
            }
        });
        match failure {
            Some(e) => {
                for (index, keys) in done {
                    index.delete(&keys, &row_ids);
                }
                Err(e)
            }
            None => Ok(()),
        }
    }

    /// Removes the rows of `chunk`, numbered from `row_start`, from every
    /// index.
    pub fn remove_from_indexes(&self, chunk: &DataChunk, row_start: u64) -> QuarryResult<()> {
        let row_ids = row_ids(row_start, chunk.size());
        let mut result = Ok(());
        self.info.indexes().scan(|index| match chunk.project(index.column_ids()) {
            Ok(keys) => {
                index.delete(&keys, &row_ids);
                false
            }
            Err(e) => {
                result = Err(e);
                true
            }
        });
        result
    }

    /// Stamps `commit_id` on the pending rows in `[row_start, row_start +
    /// count)` and adds them to the committed cardinality.
    ///
    /// Rows reverted in the meantime are skipped. Returns the number of rows
    /// committed. Does not take the append lock.
    pub fn commit_append(&self, commit_id: CommitId, row_start: u64, count: usize) -> usize {
        let mut committed = 0;
        for (row_group, offset, n) in self.row_group_ranges(row_start, count) {
            committed += row_group.commit_append(commit_id, offset, n);
        }
        self.info.add_cardinality(committed as u64);
        debug!(
            table = %self.info.qualified_name(),
            row_start,
            count = committed,
            commit_id = %commit_id,
            "append committed"
        );
        committed
    }

    /// Splits rows `[row_start, row_start + count)` into per-row-group
    /// `(row_group, offset, count)` pieces, stopping at the last appended row.
    fn row_group_ranges(&self, row_start: u64, count: usize) -> Vec<(Arc<RowGroup>, usize, usize)> {
        let mut pieces = Vec::new();
        let mut row = row_start;
        let end = row_start + count as u64;
        while row < end {
            let Some(row_group) = self.row_groups.find(row) else {
                break;
            };
            let offset = (row - row_group.start()) as usize;
            let n = row_group.count().saturating_sub(offset).min((end - row) as usize);
            if n == 0 {
                break;
            }
            row += n as u64;
            pieces.push((row_group, offset, n));
        }
        pieces
    }

    /// Removes rows `[row_start, row_start + count)` appended by a failed
    /// append.
    ///
    /// Rows at the tail of the table are truncated. Rows with later rows
    /// behind them keep their row ids but are hidden from every reader, and
    /// their index entries are removed.
    pub fn revert_append(&self, row_start: u64, count: usize) -> QuarryResult<()> {
        let _lock = self.append_lock.lock();
        self.revert_append_internal(row_start, count)
    }

    /// Reverts with the append lock already held.
    ///
    /// Safe to call again after a partial or complete revert of the same
    /// range.
    pub(crate) fn revert_append_internal(&self, row_start: u64, count: usize) -> QuarryResult<()> {
        let total = self.total_rows();
        if total <= row_start {
            return Ok(());
        }
        if total > row_start + count as u64 {
            return self.hide_appended_rows(row_start, count);
        }

        if !self.info.indexes().is_empty() {
            self.scan_table_segment(row_start, (total - row_start) as usize, |chunk, start| {
                self.remove_from_indexes(chunk, start)
            })?;
        }

        let row_groups = self.row_groups.snapshot();
        let first = row_groups.partition_point(|rg| rg.start() + rg.capacity() as u64 <= row_start);
        if let Some(row_group) = row_groups.get(first) {
            if row_group.start() >= row_start {
                self.row_groups.truncate_from(first);
            } else {
                row_group.revert_append((row_start - row_group.start()) as usize);
                self.row_groups.truncate_from(first + 1);
            }
        }
        self.total_rows.store(row_start, Ordering::Release);
        debug!(
            table = %self.info.qualified_name(),
            row_start,
            count = total - row_start,
            row_groups = self.row_groups.len(),
            "append reverted"
        );
        Ok(())
    }

    fn hide_appended_rows(&self, row_start: u64, count: usize) -> QuarryResult<()> {
        let pieces = self.row_group_ranges(row_start, count);
        for (row_group, offset, n) in &pieces {
            let versions = row_group.versions();
            let committed = (*offset..offset + n)
                .find(|&o| is_committed_version(versions.inserted(o)) && !versions.is_tombstone(o));
            if let Some(committed) = committed {
                return Err(QuarryError::internal(format!(
                    "cannot revert row {} of table '{}': its insertion is committed",
                    row_group.start() + committed as u64,
                    self.info.qualified_name()
                )));
            }
        }

        if !self.info.indexes().is_empty() {
            self.scan_table_segment(row_start, count, |chunk, start| {
                self.remove_from_indexes(chunk, start)
            })?;
        }
        for (row_group, offset, n) in &pieces {
            row_group.versions().tombstone(*offset, *n);
        }
        debug!(
            table = %self.info.qualified_name(),
            row_start,
            count,
            total_rows = self.total_rows(),
            "reverted rows hidden in place"
        );
        Ok(())
    }

    /// Writes rows `[row_start, row_start + count)` to `log`.
    ///
    /// Temporary tables are not logged.
    pub fn write_to_log(
        &self,
        log: &dyn WriteAheadLog,
        row_start: u64,
        count: usize,
    ) -> QuarryResult<()> {
        if self.info.is_temporary() {
            return Ok(());
        }
        log.write_set_table(self.info.schema(), self.info.table())?;
        self.scan_table_segment(row_start, count, |chunk, _| {
            log.write_insert(chunk)?;
            Ok(())
        })
    }

    /// Verifies, appends and indexes `chunk` on behalf of `txn`.
    ///
    /// Returns the appended range `(row_start, count)`, still uncommitted.
    /// Nothing stays appended when an error is returned.
    pub fn insert(
        &self,
        constraints: &dyn TableConstraints,
        txn: &TransactionData,
        chunk: &DataChunk,
    ) -> QuarryResult<(u64, usize)> {
        self.verify_append_constraints(constraints, chunk)?;
        let mut state = self.initialize_append(txn, chunk.size())?;
        let row_start = state.row_start();
        let appended = self
            .append(chunk, &mut state)
            .and_then(|()| self.append_to_indexes(chunk, row_start));
        match appended {
            Ok(()) => Ok(state.finish()),
            Err(e) => {
                state.revert()?;
                Err(e)
            }
        }
    }
}

fn row_ids(start: u64, count: usize) -> Vec<RowId> {
    (start..start + count as u64).map(RowId::new).collect()
}
