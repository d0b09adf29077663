//! Column statistics.
//!
//! Every column segment keeps a zone map (min, max, null count) that scans
//! use to skip row groups. The table keeps the same statistics per column,
//! merged from every append and update. Statistics only ever widen: deletes
//! and reverted appends leave them untouched.

use std::fmt;

use quarry_common::types::{LogicalType, Value};

/// Min/max/null statistics of a column or column segment.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStatistics {
    logical_type: LogicalType,
    min: Option<Value>,
    max: Option<Value>,
    null_count: u64,
    value_count: u64,
}

impl ColumnStatistics {
    /// Creates empty statistics for a column of `logical_type`.
    pub fn new(logical_type: LogicalType) -> Self {
        Self {
            logical_type,
            min: None,
            max: None,
            null_count: 0,
            value_count: 0,
        }
    }

    /// Builds statistics over a run of values.
    pub fn from_values(logical_type: LogicalType, values: &[Value]) -> Self {
        let mut stats = Self::new(logical_type);
        stats.update_all(values);
        stats
    }

    /// Returns the column type.
    pub fn logical_type(&self) -> &LogicalType {
        &self.logical_type
    }

    /// Returns the smallest non-null value seen.
    pub fn min(&self) -> Option<&Value> {
        self.min.as_ref()
    }

    /// Returns the largest non-null value seen.
    pub fn max(&self) -> Option<&Value> {
        self.max.as_ref()
    }

    /// Returns the number of NULL values seen.
    pub fn null_count(&self) -> u64 {
        self.null_count
    }

    /// Returns the number of values seen, NULL included.
    pub fn value_count(&self) -> u64 {
        self.value_count
    }

    /// Returns true if a NULL value was seen.
    pub fn has_null(&self) -> bool {
        self.null_count > 0
    }

    /// Returns true if a non-NULL value was seen.
    pub fn has_non_null(&self) -> bool {
        self.min.is_some()
    }

    /// Widens the statistics with one value.
    pub fn update(&mut self, value: &Value) {
        self.value_count += 1;
        if value.is_null() {
            self.null_count += 1;
            return;
        }
        if self.min.as_ref().map_or(true, |min| value < min) {
            self.min = Some(value.clone());
        }
        if self.max.as_ref().map_or(true, |max| value > max) {
            self.max = Some(value.clone());
        }
    }

    /// Widens the statistics with a run of values.
    pub fn update_all(&mut self, values: &[Value]) {
        for value in values {
            self.update(value);
        }
    }

    /// Merges another set of statistics into this one.
    pub fn merge(&mut self, other: &ColumnStatistics) {
        self.value_count += other.value_count;
        self.null_count += other.null_count;
        if let Some(min) = &other.min {
            if self.min.as_ref().map_or(true, |current| min < current) {
                self.min = Some(min.clone());
            }
        }
        if let Some(max) = &other.max {
            if self.max.as_ref().map_or(true, |current| max > current) {
                self.max = Some(max.clone());
            }
        }
    }
}

impl fmt::Display for ColumnStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.min, &self.max) {
            (Some(min), Some(max)) => write!(f, "[Min: {}, Max: {}]", min, max)?,
            _ => write!(f, "[Min: -, Max: -]")?,
        }
        write!(f, "[Has Null: {}]", self.has_null())
    }
}
