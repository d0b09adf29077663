//! Columnar batches.
//!
//! A [`Vector`] is one column of values of a single logical type. It either
//! owns its values or is a zero-copy window onto an immutable buffer shared
//! with a column segment. A [`DataChunk`] is a set of column-aligned vectors
//! with one row count.

use std::sync::Arc;

use super::value::{LogicalType, Value};
use crate::error::{QuarryError, QuarryResult};

#[derive(Debug, Clone)]
enum VectorData {
    Owned(Vec<Value>),
    Shared {
        buffer: Arc<Vec<Value>>,
        offset: usize,
        len: usize,
    },
}

/// A column of values.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use quarry_common::types::{LogicalType, Value, Vector};
///
/// let buffer = Arc::new((0..10).map(Value::Integer).collect::<Vec<_>>());
/// let window = Vector::window(LogicalType::Integer, Arc::clone(&buffer), 4, 3);
/// assert!(window.is_shared());
/// assert_eq!(window.values(), &buffer[4..7]);
/// ```
#[derive(Debug, Clone)]
pub struct Vector {
    logical_type: LogicalType,
    data: VectorData,
}

impl Vector {
    /// Creates an empty owned vector.
    #[must_use]
    pub fn new(logical_type: LogicalType) -> Self {
        Self {
            logical_type,
            data: VectorData::Owned(Vec::new()),
        }
    }

    /// Creates an empty owned vector with room for `capacity` values.
    #[must_use]
    pub fn with_capacity(logical_type: LogicalType, capacity: usize) -> Self {
        Self {
            logical_type,
            data: VectorData::Owned(Vec::with_capacity(capacity)),
        }
    }

    /// Creates an owned vector from values.
    #[must_use]
    pub fn from_values(logical_type: LogicalType, values: Vec<Value>) -> Self {
        Self {
            logical_type,
            data: VectorData::Owned(values),
        }
    }

    /// Creates a vector repeating `value` `count` times.
    #[must_use]
    pub fn constant(logical_type: LogicalType, value: Value, count: usize) -> Self {
        Self::from_values(logical_type, vec![value; count])
    }

    /// Creates a zero-copy window onto a shared buffer.
    ///
    /// The window is clamped to the buffer's length.
    #[must_use]
    pub fn window(
        logical_type: LogicalType,
        buffer: Arc<Vec<Value>>,
        offset: usize,
        len: usize,
    ) -> Self {
        let offset = offset.min(buffer.len());
        let len = len.min(buffer.len() - offset);
        Self {
            logical_type,
            data: VectorData::Shared {
                buffer,
                offset,
                len,
            },
        }
    }

    /// Returns the logical type of the vector.
    #[inline]
    #[must_use]
    pub fn logical_type(&self) -> &LogicalType {
        &self.logical_type
    }

    /// Returns the number of values.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.data {
            VectorData::Owned(values) => values.len(),
            VectorData::Shared { len, .. } => *len,
        }
    }

    /// Returns true if the vector holds no values.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the vector is a window onto a shared buffer.
    #[inline]
    #[must_use]
    pub fn is_shared(&self) -> bool {
        matches!(self.data, VectorData::Shared { .. })
    }

    /// Returns the values as a slice.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        match &self.data {
            VectorData::Owned(values) => values,
            VectorData::Shared {
                buffer,
                offset,
                len,
            } => &buffer[*offset..*offset + *len],
        }
    }

    /// Returns the value at `index`.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values().get(index)
    }

    /// Returns an iterator over the values.
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values().iter()
    }

    /// Returns the owned values, copying a shared window on first write.
    pub fn values_mut(&mut self) -> &mut Vec<Value> {
        if let VectorData::Shared { .. } = self.data {
            self.data = VectorData::Owned(self.values().to_vec());
        }
        match &mut self.data {
            VectorData::Owned(values) => values,
            VectorData::Shared { .. } => unreachable!("shared vector was just copied"),
        }
    }

    /// Appends a value.
    pub fn push(&mut self, value: Value) {
        self.values_mut().push(value);
    }

    /// Overwrites the value at `index`.
    pub fn set(&mut self, index: usize, value: Value) -> QuarryResult<()> {
        let len = self.len();
        match self.values_mut().get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(QuarryError::invalid_argument(format!(
                "vector index {} out of range ({} values)",
                index, len
            ))),
        }
    }

    /// Consumes the vector and returns its values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        match self.data {
            VectorData::Owned(values) => values,
            VectorData::Shared {
                buffer,
                offset,
                len,
            } => buffer[offset..offset + len].to_vec(),
        }
    }

    /// Returns a vector over `count` values starting at `offset`.
    ///
    /// Slicing a shared window yields another shared window.
    #[must_use]
    pub fn slice(&self, offset: usize, count: usize) -> Vector {
        match &self.data {
            VectorData::Shared {
                buffer,
                offset: base,
                len,
            } => {
                let offset = offset.min(*len);
                Vector::window(
                    self.logical_type.clone(),
                    Arc::clone(buffer),
                    base + offset,
                    count.min(len - offset),
                )
            }
            VectorData::Owned(values) => {
                let start = offset.min(values.len());
                let end = (start + count).min(values.len());
                Vector::from_values(self.logical_type.clone(), values[start..end].to_vec())
            }
        }
    }

    /// Returns an owned vector holding the values at the selected positions.
    #[must_use]
    pub fn select(&self, selection: &[usize]) -> Vector {
        let values = self.values();
        Vector::from_values(
            self.logical_type.clone(),
            selection
                .iter()
                .filter_map(|&i| values.get(i).cloned())
                .collect(),
        )
    }

    /// Checks that every value conforms to the vector's type.
    pub fn verify(&self) -> QuarryResult<()> {
        match self.iter().find(|value| !value.conforms_to(&self.logical_type)) {
            Some(bad) => Err(QuarryError::type_mismatch(
                &self.logical_type,
                bad.type_name(),
            )),
            None => Ok(()),
        }
    }
}

impl PartialEq for Vector {
    fn eq(&self, other: &Self) -> bool {
        self.logical_type == other.logical_type && self.values() == other.values()
    }
}

/// A batch of column-aligned vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChunk {
    columns: Vec<Vector>,
    size: usize,
}

impl DataChunk {
    /// Creates an empty chunk with one empty vector per type.
    #[must_use]
    pub fn new(types: &[LogicalType]) -> Self {
        Self {
            columns: types.iter().cloned().map(Vector::new).collect(),
            size: 0,
        }
    }

    /// Creates a chunk from vectors that must all have the same length.
    pub fn from_vectors(columns: Vec<Vector>) -> QuarryResult<Self> {
        let size = columns.first().map_or(0, Vector::len);
        if let Some(bad) = columns.iter().find(|column| column.len() != size) {
            return Err(QuarryError::invalid_argument(format!(
                "chunk columns differ in length: {} and {}",
                size,
                bad.len()
            )));
        }
        Ok(Self { columns, size })
    }

    /// Creates a chunk with an explicit row count.
    ///
    /// Unlike [`DataChunk::from_vectors`] this also works for chunks without
    /// columns, which still carry a cardinality.
    pub fn with_size(columns: Vec<Vector>, size: usize) -> QuarryResult<Self> {
        if let Some(bad) = columns.iter().find(|column| column.len() != size) {
            return Err(QuarryError::invalid_argument(format!(
                "chunk column has {} values, expected {}",
                bad.len(),
                size
            )));
        }
        Ok(Self { columns, size })
    }

    /// Creates a chunk from row-major values.
    pub fn from_rows(types: &[LogicalType], rows: &[Vec<Value>]) -> QuarryResult<Self> {
        let mut chunk = Self::new(types);
        for row in rows {
            chunk.append_row(row.clone())?;
        }
        Ok(chunk)
    }

    /// Returns the number of rows.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns true if the chunk holds no rows.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns the number of columns.
    #[inline]
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Returns the vector of column `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[inline]
    #[must_use]
    pub fn column(&self, index: usize) -> &Vector {
        &self.columns[index]
    }

    /// Returns all column vectors.
    #[inline]
    #[must_use]
    pub fn columns(&self) -> &[Vector] {
        &self.columns
    }

    /// Consumes the chunk and returns its vectors.
    #[must_use]
    pub fn into_columns(self) -> Vec<Vector> {
        self.columns
    }

    /// Returns the column types.
    #[must_use]
    pub fn types(&self) -> Vec<LogicalType> {
        self.columns
            .iter()
            .map(|column| column.logical_type().clone())
            .collect()
    }

    /// Returns row `index` as a row-major value list.
    #[must_use]
    pub fn row(&self, index: usize) -> Vec<Value> {
        self.columns
            .iter()
            .map(|column| column.get(index).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Iterates rows in row-major form.
    pub fn rows(&self) -> impl Iterator<Item = Vec<Value>> + '_ {
        (0..self.size).map(move |i| self.row(i))
    }

    /// Appends one row.
    pub fn append_row(&mut self, row: Vec<Value>) -> QuarryResult<()> {
        if row.len() != self.columns.len() {
            return Err(QuarryError::invalid_argument(format!(
                "row has {} values, chunk has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        for (column, value) in self.columns.iter_mut().zip(row) {
            column.push(value);
        }
        self.size += 1;
        Ok(())
    }

    /// Returns `count` rows starting at `offset`.
    #[must_use]
    pub fn slice(&self, offset: usize, count: usize) -> DataChunk {
        let offset = offset.min(self.size);
        let count = count.min(self.size - offset);
        DataChunk {
            columns: self
                .columns
                .iter()
                .map(|column| column.slice(offset, count))
                .collect(),
            size: count,
        }
    }

    /// Returns the rows at the selected positions.
    #[must_use]
    pub fn select(&self, selection: &[usize]) -> DataChunk {
        DataChunk {
            columns: self
                .columns
                .iter()
                .map(|column| column.select(selection))
                .collect(),
            size: selection.iter().filter(|&&i| i < self.size).count(),
        }
    }

    /// Returns a chunk holding only the given columns, in the given order.
    pub fn project(&self, column_ids: &[usize]) -> QuarryResult<DataChunk> {
        let columns = column_ids
            .iter()
            .map(|&id| {
                self.columns.get(id).cloned().ok_or_else(|| {
                    QuarryError::invalid_argument(format!("column {} out of range", id))
                })
            })
            .collect::<QuarryResult<Vec<_>>>()?;
        Ok(DataChunk {
            columns,
            size: self.size,
        })
    }

    /// Removes all rows, keeping the column types.
    pub fn reset(&mut self) {
        for column in &mut self.columns {
            *column = Vector::new(column.logical_type().clone());
        }
        self.size = 0;
    }

    /// Checks that the chunk matches `types` column by column.
    pub fn verify_types(&self, types: &[LogicalType]) -> QuarryResult<()> {
        if self.columns.len() != types.len() {
            return Err(QuarryError::invalid_argument(format!(
                "chunk has {} columns, expected {}",
                self.columns.len(),
                types.len()
            )));
        }
        for (column, expected) in self.columns.iter().zip(types) {
            if column.logical_type() != expected {
                return Err(QuarryError::type_mismatch(expected, column.logical_type()));
            }
            column.verify()?;
        }
        Ok(())
    }
}
