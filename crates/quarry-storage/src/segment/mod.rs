//! Column segments.
//!
//! A [`ColumnSegment`] stores the values of one column of one row group. The
//! values live in an immutable, reference-counted buffer so scans can hand
//! out zero-copy windows; writers copy the buffer only while a window onto
//! it is still alive.
//!
//! # Locking
//!
//! The buffer and the update undo chains sit behind one `RwLock`, so a
//! reader always sees a buffer and the chains that describe it together.
//! Zone-map statistics have their own lock and only ever widen.

mod update;

pub use update::UpdateSegment;

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{
    BlockId, CommitId, LogicalType, RowId, TransactionData, TransactionId, Value, Vector,
};

use crate::filter::{FilterPropagateResult, TableFilter};
use crate::statistics::ColumnStatistics;

/// How a persisted segment is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionType {
    /// Every value is written.
    Uncompressed,
    /// A single value repeated for the whole segment.
    Constant,
}

impl CompressionType {
    /// Returns the on-disk tag.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Uncompressed => 0,
            Self::Constant => 1,
        }
    }

    /// Decodes an on-disk tag.
    pub fn from_u8(tag: u8) -> QuarryResult<Self> {
        match tag {
            0 => Ok(Self::Uncompressed),
            1 => Ok(Self::Constant),
            other => Err(QuarryError::corruption(format!(
                "unknown compression type {}",
                other
            ))),
        }
    }

    /// Picks the encoding for a run of values.
    pub fn choose(values: &[Value]) -> Self {
        match values.split_first() {
            Some((first, rest)) if rest.iter().all(|v| v == first) => Self::Constant,
            _ => Self::Uncompressed,
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uncompressed => f.write_str("Uncompressed"),
            Self::Constant => f.write_str("Constant"),
        }
    }
}

/// Location of a persisted segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPointer {
    /// First block of the segment's block chain.
    pub block_id: BlockId,
    /// Every block of the chain.
    pub blocks: Vec<BlockId>,
    /// Encoding of the persisted values.
    pub compression: CompressionType,
    /// Number of persisted values.
    pub row_count: u64,
}

struct SegmentData {
    values: Arc<Vec<Value>>,
    updates: UpdateSegment,
}

/// The values of one column within one row group.
pub struct ColumnSegment {
    logical_type: LogicalType,
    start: u64,
    data: RwLock<SegmentData>,
    stats: Mutex<ColumnStatistics>,
    pointer: Mutex<Option<DataPointer>>,
}

impl ColumnSegment {
    /// Creates an empty segment for rows starting at `start`.
    pub fn new(logical_type: LogicalType, start: u64) -> Self {
        Self::from_values(logical_type, start, Vec::new())
    }

    /// Creates a segment holding `values`.
    pub fn from_values(logical_type: LogicalType, start: u64, values: Vec<Value>) -> Self {
        let stats = ColumnStatistics::from_values(logical_type.clone(), &values);
        Self {
            logical_type,
            start,
            data: RwLock::new(SegmentData {
                values: Arc::new(values),
                updates: UpdateSegment::new(),
            }),
            stats: Mutex::new(stats),
            pointer: Mutex::new(None),
        }
    }

    /// Returns the column type.
    pub fn logical_type(&self) -> &LogicalType {
        &self.logical_type
    }

    /// Returns the row id of the segment's first row.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Returns the number of stored values.
    pub fn count(&self) -> usize {
        self.data.read().values.len()
    }

    /// Writes `values` at `offset`, discarding anything stored at or after it.
    ///
    /// Truncating first guarantees that rows of a reverted append never
    /// resurface when the same range is appended again.
    pub fn append(&self, offset: usize, values: &[Value]) -> QuarryResult<()> {
        if let Some(bad) = values.iter().find(|v| !v.conforms_to(&self.logical_type)) {
            return Err(QuarryError::type_mismatch(&self.logical_type, bad.type_name()));
        }
        {
            let mut data = self.data.write();
            if offset > data.values.len() {
                return Err(QuarryError::internal(format!(
                    "append at offset {} past segment end {}",
                    offset,
                    data.values.len()
                )));
            }
            data.updates.truncate_from(offset);
            let buffer = Arc::make_mut(&mut data.values);
            buffer.truncate(offset);
            buffer.extend_from_slice(values);
        }
        self.stats.lock().update_all(values);
        Ok(())
    }

    /// Drops every value at or after `offset`.
    pub fn truncate(&self, offset: usize) {
        let mut data = self.data.write();
        if offset < data.values.len() {
            data.updates.truncate_from(offset);
            Arc::make_mut(&mut data.values).truncate(offset);
        }
    }

    /// Returns `count` values starting at `offset` as `view` sees them.
    ///
    /// The result is a zero-copy window when no row in the range carries an
    /// update.
    pub fn scan(&self, view: &TransactionData, offset: usize, count: usize) -> Vector {
        let data = self.data.read();
        if !data.updates.has_updates_in(offset..offset + count) {
            return Vector::window(
                self.logical_type.clone(),
                Arc::clone(&data.values),
                offset,
                count,
            );
        }
        let end = (offset + count).min(data.values.len());
        let start = offset.min(end);
        let mut values = data.values[start..end].to_vec();
        data.updates.apply(view, start, &mut values);
        Vector::from_values(self.logical_type.clone(), values)
    }

    /// Returns the value of row `offset` as `view` sees it.
    pub fn fetch(&self, view: &TransactionData, offset: usize) -> Option<Value> {
        let data = self.data.read();
        let current = data.values.get(offset)?;
        Some(data.updates.fetch(view, offset, current))
    }

    /// Overwrites the rows at `offsets` with `values` on behalf of `txn`.
    ///
    /// Either every row is updated or, on a write-write conflict, none is.
    pub fn update(
        &self,
        txn: &TransactionData,
        offsets: &[usize],
        values: &[Value],
    ) -> QuarryResult<()> {
        if offsets.len() != values.len() {
            return Err(QuarryError::invalid_argument(format!(
                "{} offsets but {} values",
                offsets.len(),
                values.len()
            )));
        }
        if let Some(bad) = values.iter().find(|v| !v.conforms_to(&self.logical_type)) {
            return Err(QuarryError::type_mismatch(&self.logical_type, bad.type_name()));
        }
        {
            let mut data = self.data.write();
            let len = data.values.len();
            for &offset in offsets {
                if offset >= len {
                    return Err(QuarryError::RowOutOfRange {
                        row_id: RowId::new(self.start + offset as u64),
                        total_rows: self.start + len as u64,
                    });
                }
                if let Some(version) = data.updates.conflict(txn, offset) {
                    return Err(QuarryError::WriteConflict {
                        row_id: RowId::new(self.start + offset as u64),
                        version,
                    });
                }
            }
            let SegmentData { values: buffer, updates } = &mut *data;
            let buffer = Arc::make_mut(buffer);
            for (&offset, value) in offsets.iter().zip(values) {
                let old = std::mem::replace(&mut buffer[offset], value.clone());
                updates.record(offset, txn.transaction_id.as_u64(), old);
            }
        }
        self.stats.lock().update_all(values);
        Ok(())
    }

    /// Returns the version of the newest update of `offset` if `txn` may not
    /// overwrite it.
    pub fn update_conflict(&self, txn: &TransactionData, offset: usize) -> Option<u64> {
        self.data.read().updates.conflict(txn, offset)
    }

    /// Undoes the newest update of each row at `offsets` made by `txn`.
    ///
    /// Rows are processed back to front so a row updated twice in one call
    /// returns to its original value.
    pub fn revert_update(&self, offsets: &[usize], txn: TransactionId) {
        let mut data = self.data.write();
        let SegmentData { values, updates } = &mut *data;
        for &offset in offsets.iter().rev() {
            if let Some(old) = updates.pop_own(offset, txn) {
                Arc::make_mut(values)[offset] = old;
            }
        }
    }

    /// Undoes every update `txn` made to the rows at `offsets`.
    pub fn rollback_updates(&self, offsets: &[usize], txn: TransactionId) {
        let mut data = self.data.write();
        let SegmentData { values, updates } = &mut *data;
        for &offset in offsets {
            while let Some(old) = updates.pop_own(offset, txn) {
                Arc::make_mut(values)[offset] = old;
            }
        }
    }

    /// Stamps `commit_id` on the updates `txn` made to the rows at `offsets`.
    pub fn commit_updates(&self, offsets: &[usize], txn: TransactionId, commit_id: CommitId) {
        let mut data = self.data.write();
        for &offset in offsets {
            data.updates.commit(offset, txn, commit_id);
        }
    }

    /// Drops undo entries no active reader can reach.
    pub fn cleanup_updates(&self, lowest_active_start: CommitId) -> usize {
        let mut data = self.data.write();
        if data.updates.is_empty() {
            return 0;
        }
        data.updates.cleanup(lowest_active_start)
    }

    /// Returns true if any row carries an undo chain.
    pub fn has_updates(&self) -> bool {
        !self.data.read().updates.is_empty()
    }

    /// Returns a copy of the zone-map statistics.
    pub fn statistics(&self) -> ColumnStatistics {
        self.stats.lock().clone()
    }

    /// Checks `filter` against the zone map.
    pub fn check_zonemap(&self, filter: &TableFilter) -> FilterPropagateResult {
        filter.check_zonemap(&self.stats.lock())
    }

    /// Returns the persisted location, if the segment was checkpointed or loaded.
    pub fn data_pointer(&self) -> Option<DataPointer> {
        self.pointer.lock().clone()
    }

    /// Replaces the persisted location, returning the previous one.
    pub fn set_data_pointer(&self, pointer: Option<DataPointer>) -> Option<DataPointer> {
        std::mem::replace(&mut *self.pointer.lock(), pointer)
    }
}

impl fmt::Debug for ColumnSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnSegment")
            .field("type", &self.logical_type)
            .field("start", &self.start)
            .field("count", &self.count())
            .finish()
    }
}
