//! Deletes and updates.
//!
//! Both mark rows on behalf of a transaction and remember the change in
//! the table's undo buffer until [`DataTable::commit_transaction`] or
//! [`DataTable::rollback_transaction`].
//!
//! Index entries only ever grow while a change is pending: a delete keeps
//! the row's entries, an update adds the new keys next to the old ones.
//! Commit removes what the change made stale and rollback removes what it
//! added, so neither has to insert into an index.

use std::collections::HashSet;
use std::sync::Arc;

use quarry_common::constants::{COLUMN_IDENTIFIER_ROW_ID, NOT_DELETED_ID};
use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{DataChunk, LogicalType, RowId, TransactionData, Value, Vector};
use tracing::{debug, warn};

use super::undo::{DeletedRow, IndexChange, UndoEntry};
use super::DataTable;
use crate::constraints::TableConstraints;
use crate::index::Index;
use crate::row_group::RowGroup;
use crate::segment::ColumnSegment;
use crate::segment_tree::SegmentNode;
use crate::version::DeleteOutcome;

/// Rows of one row group touched by a write, with their positions in the
/// caller's input.
struct RowGroupRows {
    row_group: Arc<RowGroup>,
    offsets: Vec<usize>,
    positions: Vec<usize>,
}

impl DataTable {
    fn locate(&self, row_id: RowId) -> QuarryResult<(Arc<RowGroup>, usize)> {
        let row = row_id.as_u64();
        match self.row_groups.find(row) {
            Some(row_group) => {
                let offset = (row - row_group.start()) as usize;
                Ok((row_group, offset))
            }
            None => Err(QuarryError::RowOutOfRange {
                row_id,
                total_rows: self.total_rows(),
            }),
        }
    }

    fn group_rows(&self, row_ids: &[RowId]) -> QuarryResult<Vec<RowGroupRows>> {
        let mut groups: Vec<RowGroupRows> = Vec::new();
        for (position, &row_id) in row_ids.iter().enumerate() {
            let (row_group, offset) = self.locate(row_id)?;
            match groups
                .iter_mut()
                .find(|g| Arc::ptr_eq(&g.row_group, &row_group))
            {
                Some(group) => {
                    group.offsets.push(offset);
                    group.positions.push(position);
                }
                None => groups.push(RowGroupRows {
                    row_group,
                    offsets: vec![offset],
                    positions: vec![position],
                }),
            }
        }
        Ok(groups)
    }

    /// Reads the current keys of `index` for the given rows.
    fn index_keys(
        &self,
        index: &dyn Index,
        rows: &[(Arc<RowGroup>, usize)],
    ) -> QuarryResult<DataChunk> {
        let view = TransactionData::latest();
        let types = index
            .column_ids()
            .iter()
            .map(|&column| self.check_column(column).cloned())
            .collect::<QuarryResult<Vec<LogicalType>>>()?;
        let keys = rows
            .iter()
            .map(|(row_group, offset)| row_group.fetch_values(&view, *offset, index.column_ids()))
            .collect::<QuarryResult<Vec<_>>>()?;
        DataChunk::from_rows(&types, &keys)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Deletes `row_ids` on behalf of `txn` and returns the number of rows
    /// newly deleted.
    ///
    /// Rows the transaction already deleted, or whose deletion it sees
    /// committed, are not counted. A row held by another transaction, through
    /// a delete or an update it cannot see, fails the whole call with
    /// [`QuarryError::WriteConflict`] and leaves no row deleted.
    pub fn delete(
        &self,
        constraints: &dyn TableConstraints,
        txn: &TransactionData,
        row_ids: &[RowId],
    ) -> QuarryResult<usize> {
        self.ensure_root("deleted from")?;
        constraints.verify_delete(row_ids)?;

        let locations: Vec<(Arc<RowGroup>, usize)> = row_ids
            .iter()
            .map(|&row_id| self.locate(row_id))
            .collect::<QuarryResult<_>>()?;
        // every fallible read happens before the first row is marked
        let mut index_keys = Vec::new();
        for (_, index) in self.info.indexes().snapshot() {
            let keys = self.index_keys(index.as_ref(), &locations)?;
            index_keys.push((index, keys));
        }

        let mut deleted: Vec<DeletedRow> = Vec::new();
        let mut positions = Vec::new();
        for (position, (&row_id, (row_group, offset))) in row_ids.iter().zip(locations).enumerate() {
            let outcome = match row_group.versions().delete(txn, offset) {
                DeleteOutcome::Deleted => match row_group.update_conflict(txn, offset) {
                    Some(version) => {
                        row_group.versions().undo_delete(offset, txn.transaction_id);
                        DeleteOutcome::Conflict(version)
                    }
                    None => DeleteOutcome::Deleted,
                },
                outcome => outcome,
            };
            match outcome {
                DeleteOutcome::Deleted => {
                    deleted.push(DeletedRow {
                        row_group,
                        offset,
                        row_id,
                    });
                    positions.push(position);
                }
                DeleteOutcome::AlreadyDeleted => {}
                DeleteOutcome::Conflict(version) => {
                    for row in &deleted {
                        row.row_group
                            .versions()
                            .undo_delete(row.offset, txn.transaction_id);
                    }
                    warn!(
                        table = %self.info.qualified_name(),
                        row_id = %row_id,
                        version,
                        "delete conflict"
                    );
                    return Err(QuarryError::WriteConflict { row_id, version });
                }
            }
        }
        if deleted.is_empty() {
            return Ok(0);
        }

        let index_keys = index_keys
            .into_iter()
            .map(|(index, keys)| (index, keys.select(&positions)))
            .collect();
        let count = deleted.len();
        self.info.undo().push(
            txn.transaction_id,
            UndoEntry::Delete {
                rows: deleted,
                index_keys,
            },
        );
        debug!(
            table = %self.info.qualified_name(),
            txn = %txn.transaction_id,
            count,
            "rows deleted"
        );
        Ok(count)
    }

    // =========================================================================
    // Update
    // =========================================================================

    /// Checks an update chunk against the column types and the table's
    /// constraints.
    pub fn verify_update_constraints(
        &self,
        constraints: &dyn TableConstraints,
        updates: &DataChunk,
        column_ids: &[usize],
    ) -> QuarryResult<()> {
        if updates.column_count() != column_ids.len() {
            return Err(QuarryError::invalid_argument(format!(
                "update has {} columns for {} column ids",
                updates.column_count(),
                column_ids.len()
            )));
        }
        let mut seen = HashSet::new();
        for (vector, &column) in updates.columns().iter().zip(column_ids) {
            if column == COLUMN_IDENTIFIER_ROW_ID {
                return Err(QuarryError::invalid_argument("cannot update the row id"));
            }
            if !seen.insert(column) {
                return Err(QuarryError::invalid_argument(format!(
                    "column {} updated twice",
                    column
                )));
            }
            let expected = self.check_column(column)?;
            if vector.logical_type() != expected {
                return Err(QuarryError::type_mismatch(expected, vector.logical_type()));
            }
            vector.verify()?;
        }
        constraints.verify_update(updates, column_ids)
    }

    /// Overwrites `column_ids` of `row_ids` with `updates` on behalf of
    /// `txn`.
    ///
    /// Either every value is written or, on error, none is.
    pub fn update(
        &self,
        constraints: &dyn TableConstraints,
        txn: &TransactionData,
        row_ids: &[RowId],
        column_ids: &[usize],
        updates: &DataChunk,
    ) -> QuarryResult<()> {
        self.ensure_root("updated")?;
        self.verify_update_constraints(constraints, updates, column_ids)?;
        let logged = column_ids
            .iter()
            .zip(updates.columns())
            .map(|(&column, vector)| (vec![column], vector.clone()))
            .collect();
        self.update_internal(txn, row_ids, column_ids, updates, logged)
    }

    /// Overwrites the (sub-)column at `column_path` of `row_ids` without
    /// checking constraints.
    ///
    /// The first path element is a table column; further elements descend
    /// into struct fields. Used to replay logged updates.
    pub fn update_column(
        &self,
        txn: &TransactionData,
        row_ids: &[RowId],
        column_path: &[usize],
        values: &Vector,
    ) -> QuarryResult<()> {
        self.ensure_root("updated")?;
        let Some((&column, field_path)) = column_path.split_first() else {
            return Err(QuarryError::invalid_argument("empty column path"));
        };
        let column_type = self.check_column(column)?.clone();
        let target = column_type.resolve_path(field_path)?;
        if values.logical_type() != target {
            return Err(QuarryError::type_mismatch(target, values.logical_type()));
        }
        values.verify()?;
        if values.len() != row_ids.len() {
            return Err(QuarryError::invalid_argument(format!(
                "{} values for {} rows",
                values.len(),
                row_ids.len()
            )));
        }

        let column_values = if field_path.is_empty() {
            values.clone()
        } else {
            let mut merged = Vec::with_capacity(row_ids.len());
            for (&row_id, value) in row_ids.iter().zip(values.iter()) {
                let (row_group, offset) = self.locate(row_id)?;
                let mut current = row_group
                    .column_segment(column)?
                    .fetch(txn, offset)
                    .unwrap_or(Value::Null);
                current.set_path(&column_type, field_path, value.clone())?;
                merged.push(current);
            }
            Vector::from_values(column_type, merged)
        };
        let updates = DataChunk::from_vectors(vec![column_values])?;
        self.update_internal(
            txn,
            row_ids,
            &[column],
            &updates,
            vec![(column_path.to_vec(), values.clone())],
        )
    }

    fn check_updatable(&self, txn: &TransactionData, row_ids: &[RowId]) -> QuarryResult<()> {
        for &row_id in row_ids {
            let (row_group, offset) = self.locate(row_id)?;
            let versions = row_group.versions();
            let inserted = versions.inserted(offset);
            if !txn.is_visible(inserted) {
                return Err(QuarryError::WriteConflict {
                    row_id,
                    version: inserted,
                });
            }
            let deleted = versions.deleted(offset);
            if deleted == NOT_DELETED_ID {
                continue;
            }
            if txn.is_own(deleted) {
                return Err(QuarryError::invalid_argument(format!(
                    "row {} was deleted by this transaction",
                    row_id
                )));
            }
            return Err(QuarryError::WriteConflict {
                row_id,
                version: deleted,
            });
        }
        Ok(())
    }

    fn update_internal(
        &self,
        txn: &TransactionData,
        row_ids: &[RowId],
        column_ids: &[usize],
        updates: &DataChunk,
        logged: Vec<(Vec<usize>, Vector)>,
    ) -> QuarryResult<()> {
        if updates.size() != row_ids.len() {
            return Err(QuarryError::invalid_argument(format!(
                "{} update rows for {} row ids",
                updates.size(),
                row_ids.len()
            )));
        }
        if row_ids.is_empty() {
            return Ok(());
        }
        self.check_updatable(txn, row_ids)?;
        let groups = self.group_rows(row_ids)?;

        // old keys must be read before the segments change
        let locations: Vec<(Arc<RowGroup>, usize)> = row_ids
            .iter()
            .map(|&row_id| self.locate(row_id))
            .collect::<QuarryResult<_>>()?;
        let mut affected = Vec::new();
        for (_, index) in self.info.indexes().snapshot() {
            if index.column_ids().iter().any(|c| column_ids.contains(c)) {
                let old_keys = self.index_keys(index.as_ref(), &locations)?;
                affected.push((index, old_keys));
            }
        }

        let mut applied: Vec<Vec<(Arc<ColumnSegment>, Vec<usize>)>> = Vec::new();
        for (i, &column) in column_ids.iter().enumerate() {
            let source = updates.column(i).values();
            let mut segments = Vec::with_capacity(groups.len());
            for group in &groups {
                let written = group.row_group.column_segment(column).and_then(|segment| {
                    let values: Vec<Value> =
                        group.positions.iter().map(|&p| source[p].clone()).collect();
                    segment.update(txn, &group.offsets, &values)?;
                    Ok(segment)
                });
                match written {
                    Ok(segment) => segments.push((segment, group.offsets.clone())),
                    Err(e) => {
                        applied.push(segments);
                        revert_segments(&applied, txn);
                        if e.is_conflict() {
                            warn!(table = %self.info.qualified_name(), error = %e, "update conflict");
                        }
                        return Err(e);
                    }
                }
            }
            applied.push(segments);
        }
        // a concurrent delete marks first and checks updates second
        if let Err(e) = self.check_updatable(txn, row_ids) {
            revert_segments(&applied, txn);
            return Err(e);
        }

        let mut index_changes: Vec<IndexChange> = Vec::new();
        for (index, old_keys) in affected {
            let result = self
                .index_keys(index.as_ref(), &locations)
                .and_then(|new_keys| index.append(&new_keys, row_ids).map(|()| new_keys));
            match result {
                Ok(new_keys) => index_changes.push(IndexChange {
                    index,
                    old_keys,
                    new_keys,
                }),
                Err(e) => {
                    for change in &index_changes {
                        change.index.delete(&change.new_keys, row_ids);
                    }
                    revert_segments(&applied, txn);
                    return Err(e);
                }
            }
        }

        for (i, &column) in column_ids.iter().enumerate() {
            self.merge_stats(column, updates.column(i).values());
        }

        // index changes are attached to the first column's entry
        let mut index_changes = Some(index_changes);
        for (segments, (column_path, values)) in applied.into_iter().zip(logged) {
            self.info.undo().push(
                txn.transaction_id,
                UndoEntry::Update {
                    segments,
                    column_path,
                    row_ids: row_ids.to_vec(),
                    values,
                    index_changes: index_changes.take().unwrap_or_default(),
                },
            );
        }
        debug!(
            table = %self.info.qualified_name(),
            txn = %txn.transaction_id,
            rows = row_ids.len(),
            columns = column_ids.len(),
            "rows updated"
        );
        Ok(())
    }
}

fn revert_segments(applied: &[Vec<(Arc<ColumnSegment>, Vec<usize>)>], txn: &TransactionData) {
    for segments in applied.iter().rev() {
        for (segment, offsets) in segments.iter().rev() {
            segment.revert_update(offsets, txn.transaction_id);
        }
    }
}
