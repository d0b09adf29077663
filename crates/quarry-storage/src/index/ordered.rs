//! An ordered, optionally unique index.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;

use parking_lot::RwLock;
use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{DataChunk, RowId, Value};
use tracing::debug;

use super::Index;

/// A B-tree index from key tuples to row ids.
///
/// Keys containing a NULL are never considered duplicates. A key is a
/// duplicate only when it is stored for another row: a row may hold the same
/// key more than once while an update of it is pending, and each
/// [`Index::delete`] removes one such entry.
///
/// # Example
///
/// ```rust
/// use quarry_common::types::{DataChunk, LogicalType, RowId, Value};
/// use quarry_storage::index::{Index, OrderedIndex};
///
/// let index = OrderedIndex::new("pk", vec![0], true);
/// let keys = DataChunk::from_rows(&[LogicalType::Integer], &[vec![Value::Integer(1)]]).unwrap();
/// index.append(&keys, &[RowId::new(0)]).unwrap();
/// assert!(index.append(&keys, &[RowId::new(1)]).is_err());
/// assert_eq!(index.lookup(&[Value::Integer(1)]), vec![RowId::new(0)]);
/// ```
pub struct OrderedIndex {
    name: String,
    column_ids: Vec<usize>,
    unique: bool,
    entries: RwLock<BTreeMap<Vec<Value>, Vec<RowId>>>,
}

impl OrderedIndex {
    /// Creates an empty index over `column_ids`.
    pub fn new(name: impl Into<String>, column_ids: Vec<usize>, unique: bool) -> Self {
        Self {
            name: name.into(),
            column_ids,
            unique,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    fn remove_entry(entries: &mut BTreeMap<Vec<Value>, Vec<RowId>>, key: &[Value], row_id: RowId) {
        if let Some(rows) = entries.get_mut(key) {
            if let Some(position) = rows.iter().position(|&r| r == row_id) {
                rows.swap_remove(position);
            }
            if rows.is_empty() {
                entries.remove(key);
            }
        }
    }

    fn check_shape(&self, keys: &DataChunk, row_ids: &[RowId]) -> QuarryResult<()> {
        if keys.column_count() != self.column_ids.len() || keys.size() != row_ids.len() {
            return Err(QuarryError::invalid_argument(format!(
                "index '{}' expects {} key columns for {} rows, got {} columns and {} rows",
                self.name,
                self.column_ids.len(),
                row_ids.len(),
                keys.column_count(),
                keys.size()
            )));
        }
        Ok(())
    }
}

fn format_key(key: &[Value]) -> String {
    let parts: Vec<String> = key.iter().map(ToString::to_string).collect();
    format!("({})", parts.join(", "))
}

fn is_empty_range(lower: Bound<&[Value]>, upper: Bound<&[Value]>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u))
        | (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
        _ => false,
    }
}

impl Index for OrderedIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn column_ids(&self) -> &[usize] {
        &self.column_ids
    }

    fn is_unique(&self) -> bool {
        self.unique
    }

    fn append(&self, keys: &DataChunk, row_ids: &[RowId]) -> QuarryResult<()> {
        self.check_shape(keys, row_ids)?;
        let mut entries = self.entries.write();
        for (row, &row_id) in row_ids.iter().enumerate() {
            let key = keys.row(row);
            let duplicate = self.unique
                && !key.iter().any(Value::is_null)
                && entries
                    .get(&key)
                    .map_or(false, |rows| rows.iter().any(|&r| r != row_id));
            if duplicate {
                // undo this call's insertions before reporting
                for (undo_row, &undo_id) in row_ids.iter().enumerate().take(row) {
                    Self::remove_entry(&mut entries, &keys.row(undo_row), undo_id);
                }
                debug!(index = %self.name, key = %format_key(&key), "unique violation");
                return Err(QuarryError::UniqueViolation {
                    index: self.name.clone(),
                    key: format_key(&key),
                });
            }
            entries.entry(key).or_default().push(row_id);
        }
        Ok(())
    }

    fn delete(&self, keys: &DataChunk, row_ids: &[RowId]) {
        let mut entries = self.entries.write();
        for (row, &row_id) in row_ids.iter().enumerate().take(keys.size()) {
            Self::remove_entry(&mut entries, &keys.row(row), row_id);
        }
    }

    fn scan_range(&self, lower: Bound<&[Value]>, upper: Bound<&[Value]>) -> Vec<RowId> {
        if is_empty_range(lower, upper) {
            return Vec::new();
        }
        let entries = self.entries.read();
        let mut result: Vec<RowId> = Vec::new();
        for (_, rows) in entries.range::<[Value], _>((lower, upper)) {
            let mut rows = rows.clone();
            rows.sort_unstable();
            rows.dedup();
            result.extend(rows);
        }
        result
    }

    fn len(&self) -> usize {
        self.entries.read().values().map(Vec::len).sum()
    }
}

impl fmt::Debug for OrderedIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedIndex")
            .field("name", &self.name)
            .field("column_ids", &self.column_ids)
            .field("unique", &self.unique)
            .field("len", &self.len())
            .finish()
    }
}
