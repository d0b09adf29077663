//! Row groups: horizontal partitions of a table.
//!
//! A row group owns the fixed row-id range `[start, start + capacity)`. It
//! holds one column per table column and the version metadata of its rows.
//! Rows fill the group from the front; `count` is published with release
//! ordering after the column data and version ids are written, so a reader
//! that observes a count also observes the rows below it.
//!
//! Row groups inherited by a new table generation are sealed (capacity
//! equals count) and share their stored segments and version info with the
//! parent. Columns added or retyped by the new generation are
//! [`DerivedColumn`]s, evaluated from the parent's columns on first use.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use quarry_common::constants::COLUMN_IDENTIFIER_ROW_ID;
use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{
    CommitId, DataChunk, LogicalType, TransactionData, Value, Vector,
};
use tracing::debug;

use crate::expression::{evaluate_checked, Expression};
use crate::filter::{FilterPropagateResult, TableFilterSet};
use crate::segment::ColumnSegment;
use crate::segment_tree::SegmentNode;
use crate::statistics::ColumnStatistics;
use crate::version::VersionInfo;

// =============================================================================
// Columns
// =============================================================================

/// A column computed from columns of a parent generation's row group.
pub struct DerivedColumn {
    logical_type: LogicalType,
    source: Arc<RowGroup>,
    bound_columns: Vec<usize>,
    expression: Arc<dyn Expression>,
    materialized: Mutex<Option<Arc<ColumnSegment>>>,
}

impl DerivedColumn {
    /// Creates a derived column evaluating `expression` over the
    /// `bound_columns` of `source`.
    pub fn new(
        source: Arc<RowGroup>,
        bound_columns: Vec<usize>,
        expression: Arc<dyn Expression>,
    ) -> Self {
        Self {
            logical_type: expression.return_type().clone(),
            source,
            bound_columns,
            expression,
            materialized: Mutex::new(None),
        }
    }

    /// Returns the column type.
    pub fn logical_type(&self) -> &LogicalType {
        &self.logical_type
    }

    /// Returns the materialized segment, if it was computed already.
    pub fn materialized(&self) -> Option<Arc<ColumnSegment>> {
        self.materialized.lock().clone()
    }

    /// Computes the column over the first `count` rows of the source, once.
    ///
    /// Inputs are read in their committed image.
    fn materialize(&self, start: u64, count: usize) -> QuarryResult<Arc<ColumnSegment>> {
        let mut slot = self.materialized.lock();
        if let Some(segment) = slot.as_ref() {
            return Ok(Arc::clone(segment));
        }
        let view = TransactionData::committed();
        let inputs = self
            .bound_columns
            .iter()
            .map(|&column| Ok(self.source.column_segment(column)?.scan(&view, 0, count)))
            .collect::<QuarryResult<Vec<_>>>()?;
        let input = DataChunk::with_size(inputs, count)?;
        let values = evaluate_checked(self.expression.as_ref(), &input)?.into_values();
        let segment = Arc::new(ColumnSegment::from_values(
            self.logical_type.clone(),
            start,
            values,
        ));
        debug!(start, count, column_type = %self.logical_type, "materialized derived column");
        *slot = Some(Arc::clone(&segment));
        Ok(segment)
    }
}

/// One column of a row group.
#[derive(Clone)]
pub enum RowGroupColumn {
    /// Values stored in a segment.
    Stored(Arc<ColumnSegment>),
    /// Values computed from a parent generation.
    Derived(Arc<DerivedColumn>),
}

impl RowGroupColumn {
    /// Returns the column type.
    pub fn logical_type(&self) -> &LogicalType {
        match self {
            Self::Stored(segment) => segment.logical_type(),
            Self::Derived(derived) => derived.logical_type(),
        }
    }

    /// Returns true for a derived column.
    pub fn is_derived(&self) -> bool {
        matches!(self, Self::Derived(_))
    }

    /// Returns the segment holding the values, without materializing.
    pub fn segment(&self) -> Option<Arc<ColumnSegment>> {
        match self {
            Self::Stored(segment) => Some(Arc::clone(segment)),
            Self::Derived(derived) => derived.materialized(),
        }
    }
}

// =============================================================================
// Row Group
// =============================================================================

/// Rows produced by scanning one range of a row group.
pub(crate) struct ScanBatch {
    pub columns: Vec<Vector>,
    pub size: usize,
    pub all_filters_applied: bool,
}

/// A horizontal partition of a table.
pub struct RowGroup {
    start: u64,
    capacity: usize,
    vector_size: usize,
    count: AtomicUsize,
    columns: Vec<RowGroupColumn>,
    versions: Arc<VersionInfo>,
}

impl RowGroup {
    /// Creates an empty row group for rows starting at `start`.
    pub fn new(start: u64, capacity: usize, vector_size: usize, types: &[LogicalType]) -> Self {
        Self {
            start,
            capacity,
            vector_size,
            count: AtomicUsize::new(0),
            columns: types
                .iter()
                .map(|ty| RowGroupColumn::Stored(Arc::new(ColumnSegment::new(ty.clone(), start))))
                .collect(),
            versions: Arc::new(VersionInfo::new(capacity, vector_size)),
        }
    }

    /// Creates a row group from stored segments.
    ///
    /// Every segment must hold `count` values.
    pub fn from_segments(
        start: u64,
        capacity: usize,
        vector_size: usize,
        count: usize,
        segments: Vec<Arc<ColumnSegment>>,
        versions: VersionInfo,
    ) -> QuarryResult<Self> {
        if count > capacity {
            return Err(QuarryError::corruption(format!(
                "row group at {} holds {} rows but has capacity {}",
                start, count, capacity
            )));
        }
        if let Some(bad) = segments.iter().find(|s| s.count() != count) {
            return Err(QuarryError::corruption(format!(
                "row group at {} has {} rows but a segment holds {}",
                start,
                count,
                bad.count()
            )));
        }
        Ok(Self {
            start,
            capacity,
            vector_size,
            count: AtomicUsize::new(count),
            columns: segments.into_iter().map(RowGroupColumn::Stored).collect(),
            versions: Arc::new(versions),
        })
    }

    /// Creates a sealed row group for a new table generation.
    ///
    /// The result covers the same rows as `source` and shares its version
    /// info; `columns` describes the new generation's columns.
    pub fn inherit(source: &RowGroup, columns: Vec<RowGroupColumn>) -> Self {
        let count = source.count();
        Self {
            start: source.start,
            capacity: count,
            vector_size: source.vector_size,
            count: AtomicUsize::new(count),
            columns,
            versions: Arc::clone(&source.versions),
        }
    }

    /// Returns the row capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of rows appended so far.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Returns true if no more rows fit.
    pub fn is_full(&self) -> bool {
        self.count() >= self.capacity
    }

    /// Returns the number of vectors covering the appended rows.
    pub fn vector_count(&self) -> usize {
        self.count().div_ceil(self.vector_size)
    }

    /// Returns the scan vector size.
    pub fn vector_size(&self) -> usize {
        self.vector_size
    }

    /// Returns the columns.
    pub fn columns(&self) -> &[RowGroupColumn] {
        &self.columns
    }

    /// Returns the version metadata.
    pub fn versions(&self) -> &VersionInfo {
        &self.versions
    }

    /// Returns the segment of column `index`, materializing a derived column.
    pub fn column_segment(&self, index: usize) -> QuarryResult<Arc<ColumnSegment>> {
        match self.columns.get(index) {
            Some(RowGroupColumn::Stored(segment)) => Ok(Arc::clone(segment)),
            Some(RowGroupColumn::Derived(derived)) => derived.materialize(self.start, self.count()),
            None => Err(QuarryError::invalid_argument(format!(
                "column {} out of range ({} columns)",
                index,
                self.columns.len()
            ))),
        }
    }

    /// Appends `count` rows of `chunk`, starting at `chunk_offset`, tagged
    /// with the insertion id `version`.
    pub fn append(
        &self,
        version: u64,
        chunk: &DataChunk,
        chunk_offset: usize,
        count: usize,
    ) -> QuarryResult<()> {
        let offset = self.count();
        if offset + count > self.capacity {
            return Err(QuarryError::internal(format!(
                "append of {} rows overflows row group at {} ({} of {} used)",
                count, self.start, offset, self.capacity
            )));
        }
        if chunk.column_count() != self.columns.len() {
            return Err(QuarryError::invalid_argument(format!(
                "chunk has {} columns, row group has {}",
                chunk.column_count(),
                self.columns.len()
            )));
        }
        for (index, column) in self.columns.iter().enumerate() {
            let RowGroupColumn::Stored(segment) = column else {
                return Err(QuarryError::internal("append into a derived column"));
            };
            let values = &chunk.column(index).values()[chunk_offset..chunk_offset + count];
            if let Err(e) = segment.append(offset, values) {
                self.truncate_columns(offset);
                return Err(e);
            }
        }
        self.versions.append(version, offset, count);
        self.count.store(offset + count, Ordering::Release);
        Ok(())
    }

    /// Stamps `commit_id` on the uncommitted rows in `[offset, offset + count)`
    /// and returns how many were stamped.
    pub fn commit_append(&self, commit_id: CommitId, offset: usize, count: usize) -> usize {
        self.versions.commit_append(commit_id, offset, count)
    }

    /// Drops every row at or after `offset`.
    pub fn revert_append(&self, offset: usize) {
        let old = self.count.load(Ordering::Acquire);
        if offset >= old {
            return;
        }
        self.count.store(offset, Ordering::Release);
        self.versions.revert_append(offset, old - offset);
        self.truncate_columns(offset);
    }

    fn truncate_columns(&self, offset: usize) {
        for column in &self.columns {
            if let RowGroupColumn::Stored(segment) = column {
                segment.truncate(offset);
            }
        }
    }

    /// Returns false if the zone maps prove no row can pass `filters`.
    pub(crate) fn check_zonemap(
        &self,
        column_ids: &[usize],
        filters: &TableFilterSet,
    ) -> QuarryResult<bool> {
        for (position, filter) in filters.iter() {
            let Some(&column_id) = column_ids.get(position) else {
                continue;
            };
            if column_id == COLUMN_IDENTIFIER_ROW_ID {
                continue;
            }
            let segment = self.column_segment(column_id)?;
            if segment.check_zonemap(filter) == FilterPropagateResult::AlwaysFalse {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Scans rows `[offset, offset + count)`.
    ///
    /// With `check_versions` unset every row in the range is produced. The
    /// returned columns are shared windows when every row of the range is
    /// produced and no update touched it.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn scan(
        &self,
        view: &TransactionData,
        offset: usize,
        count: usize,
        column_ids: &[usize],
        filters: Option<&TableFilterSet>,
        check_versions: bool,
        selection: &mut Vec<usize>,
    ) -> QuarryResult<ScanBatch> {
        let mut columns = Vec::with_capacity(column_ids.len());
        let mut available = count;
        for &column_id in column_ids {
            let vector = if column_id == COLUMN_IDENTIFIER_ROW_ID {
                self.row_id_vector(offset, count)
            } else {
                self.column_segment(column_id)?.scan(view, offset, count)
            };
            // a concurrent revert may have shortened the segments
            available = available.min(vector.len());
            columns.push(vector);
        }

        if check_versions {
            self.versions.visible_selection(view, offset, available, selection);
        } else {
            selection.clear();
            selection.extend(0..available);
        }

        let mut all_filters_applied = true;
        if let Some(filters) = filters {
            for (position, filter) in filters.iter() {
                let vector = columns.get(position).ok_or_else(|| {
                    QuarryError::invalid_argument(format!(
                        "filter on scan column {} but only {} columns are scanned",
                        position,
                        column_ids.len()
                    ))
                })?;
                let values = vector.values();
                selection.retain(|&i| match filter.evaluate(&values[i]) {
                    Some(matches) => matches,
                    None => {
                        all_filters_applied = false;
                        true
                    }
                });
            }
        }

        let size = selection.len();
        let columns = if size == count {
            columns
        } else {
            columns.iter().map(|column| column.select(selection)).collect()
        };
        Ok(ScanBatch {
            columns,
            size,
            all_filters_applied,
        })
    }

    fn row_id_vector(&self, offset: usize, count: usize) -> Vector {
        let base = self.start + offset as u64;
        Vector::from_values(
            LogicalType::BigInt,
            (0..count as u64)
                .map(|i| Value::BigInt((base + i) as i64))
                .collect(),
        )
    }

    /// Returns the values of row `offset` in `column_ids`, ignoring versions.
    pub(crate) fn fetch_values(
        &self,
        view: &TransactionData,
        offset: usize,
        column_ids: &[usize],
    ) -> QuarryResult<Vec<Value>> {
        column_ids
            .iter()
            .map(|&column_id| {
                if column_id == COLUMN_IDENTIFIER_ROW_ID {
                    return Ok(Value::BigInt((self.start + offset as u64) as i64));
                }
                Ok(self
                    .column_segment(column_id)?
                    .fetch(view, offset)
                    .unwrap_or(Value::Null))
            })
            .collect()
    }

    /// Returns the row at `offset` if `view` can see it.
    pub(crate) fn fetch_row(
        &self,
        view: &TransactionData,
        offset: usize,
        column_ids: &[usize],
    ) -> QuarryResult<Option<Vec<Value>>> {
        if !self.versions.is_visible(view, offset) {
            return Ok(None);
        }
        self.fetch_values(view, offset, column_ids).map(Some)
    }

    /// Returns the version of an update of row `offset` that `txn` may not
    /// overwrite, looking at every column holding values.
    pub(crate) fn update_conflict(&self, txn: &TransactionData, offset: usize) -> Option<u64> {
        self.columns
            .iter()
            .filter_map(RowGroupColumn::segment)
            .find_map(|segment| segment.update_conflict(txn, offset))
    }

    /// Returns the number of leading rows whose insertion is committed.
    pub fn committed_count(&self) -> usize {
        self.versions.committed_prefix(self.count())
    }

    /// Merges the zone maps of column `index` into `stats`.
    pub fn merge_statistics(&self, index: usize, stats: &mut ColumnStatistics) -> QuarryResult<()> {
        stats.merge(&self.column_segment(index)?.statistics());
        Ok(())
    }

    /// Drops update undo entries no active reader can reach.
    pub fn cleanup_versions(&self, lowest_active_start: CommitId) -> usize {
        self.columns
            .iter()
            .filter_map(RowGroupColumn::segment)
            .map(|segment| segment.cleanup_updates(lowest_active_start))
            .sum()
    }
}

impl SegmentNode for RowGroup {
    fn start(&self) -> u64 {
        self.start
    }

    fn count(&self) -> u64 {
        RowGroup::count(self) as u64
    }
}

impl fmt::Debug for RowGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowGroup")
            .field("start", &self.start)
            .field("count", &self.count())
            .field("capacity", &self.capacity)
            .field("columns", &self.columns.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{CastExpression, ConstantExpression};
    use crate::filter::{CompareOp, TableFilter};
    use quarry_common::types::TransactionId;

    fn chunk(range: std::ops::Range<i32>) -> DataChunk {
        let rows: Vec<Vec<Value>> = range
            .map(|i| vec![Value::Integer(i), Value::from(format!("r{}", i))])
            .collect();
        DataChunk::from_rows(&[LogicalType::Integer, LogicalType::Varchar], &rows).unwrap()
    }

    fn loaded_group() -> Arc<RowGroup> {
        let group = RowGroup::new(
            1000,
            64,
            16,
            &[LogicalType::Integer, LogicalType::Varchar],
        );
        group.append(CommitId::LOADED.as_u64(), &chunk(0..40), 0, 40).unwrap();
        Arc::new(group)
    }

    #[test]
    fn test_append_and_scan() {
        let group = loaded_group();
        assert_eq!(group.count(), 40);
        assert_eq!(group.vector_count(), 3);

        let view = TransactionData::committed();
        let mut selection = Vec::new();
        let batch = group
            .scan(&view, 32, 16, &[1, COLUMN_IDENTIFIER_ROW_ID], None, true, &mut selection)
            .unwrap();
        assert_eq!(batch.size, 8);
        assert_eq!(batch.columns[0].values()[0], Value::from("r32"));
        assert_eq!(batch.columns[1].values()[7], Value::BigInt(1039));

        let full = group.scan(&view, 0, 16, &[0], None, true, &mut selection).unwrap();
        assert!(full.columns[0].is_shared());
    }

    #[test]
    fn test_scan_applies_filters() {
        let group = loaded_group();
        let filters = TableFilterSet::new()
            .with_filter(0, TableFilter::compare(CompareOp::GreaterThanOrEqual, 10));
        let mut selection = Vec::new();
        let batch = group
            .scan(&TransactionData::committed(), 0, 16, &[0], Some(&filters), true, &mut selection)
            .unwrap();
        assert_eq!(batch.size, 6);
        assert!(batch.all_filters_applied);

        let pruned = TableFilterSet::new()
            .with_filter(0, TableFilter::compare(CompareOp::GreaterThan, 100));
        assert!(!group.check_zonemap(&[0], &pruned).unwrap());
        assert!(group.check_zonemap(&[0], &filters).unwrap());

        let undecidable = TableFilterSet::new()
            .with_filter(0, TableFilter::compare(CompareOp::Equal, "x"));
        let batch = group
            .scan(&TransactionData::committed(), 0, 4, &[0], Some(&undecidable), true, &mut selection)
            .unwrap();
        assert_eq!(batch.size, 4);
        assert!(!batch.all_filters_applied);
    }

    #[test]
    fn test_revert_hides_rows() {
        let group = loaded_group();
        let writer = TransactionData::new(CommitId::new(1), TransactionId::new(1));
        group
            .append(writer.transaction_id.as_u64(), &chunk(40..50), 0, 10)
            .unwrap();
        assert_eq!(group.committed_count(), 40);
        assert!(group.fetch_row(&writer, 45, &[0]).unwrap().is_some());

        group.revert_append(40);
        assert_eq!(group.count(), 40);
        assert_eq!(group.column_segment(0).unwrap().count(), 40);
        assert!(group.append(0, &chunk(0..30), 0, 30).is_err());
    }

    #[test]
    fn test_derived_columns() {
        let source = loaded_group();
        let default = Arc::new(ConstantExpression::new(LogicalType::BigInt, Value::BigInt(7)).unwrap());
        let cast = Arc::new(CastExpression::new(LogicalType::Varchar));
        let columns = vec![
            RowGroupColumn::Derived(Arc::new(DerivedColumn::new(Arc::clone(&source), vec![0], cast))),
            source.columns()[1].clone(),
            RowGroupColumn::Derived(Arc::new(DerivedColumn::new(Arc::clone(&source), vec![], default))),
        ];
        let child = RowGroup::inherit(&source, columns);
        assert!(child.is_full());
        assert!(child.columns()[0].segment().is_none());

        let row = child.fetch_values(&TransactionData::committed(), 3, &[0, 1, 2]).unwrap();
        assert_eq!(row, vec![Value::from("3"), Value::from("r3"), Value::BigInt(7)]);
        assert!(child.columns()[0].segment().is_some());

        // version info is shared with the parent
        let deleter = TransactionData::new(CommitId::new(1), TransactionId::new(2));
        child.versions().delete(&deleter, 3);
        assert!(!source.versions().is_visible(&deleter, 3));
    }
}
