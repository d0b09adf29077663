//! Filters pushed down into table scans.
//!
//! A [`TableFilterSet`] attaches at most one [`TableFilter`] to each scanned
//! column. Scans use the filters twice: against segment statistics to skip
//! whole row groups, and per row to drop non-matching rows.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use quarry_common::types::Value;

use crate::statistics::ColumnStatistics;

/// Comparison operator of a constant filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `=`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
}

impl CompareOp {
    fn matches(self, ordering: Ordering) -> bool {
        match self {
            Self::Equal => ordering == Ordering::Equal,
            Self::NotEqual => ordering != Ordering::Equal,
            Self::LessThan => ordering == Ordering::Less,
            Self::LessThanOrEqual => ordering != Ordering::Greater,
            Self::GreaterThan => ordering == Ordering::Greater,
            Self::GreaterThanOrEqual => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
        };
        f.write_str(op)
    }
}

/// Outcome of checking a filter against column statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPropagateResult {
    /// No row in the segment can match.
    AlwaysFalse,
    /// Every row in the segment matches.
    AlwaysTrue,
    /// The statistics do not decide the filter.
    NoPruningPossible,
}

/// A filter on one column.
#[derive(Debug, Clone, PartialEq)]
pub enum TableFilter {
    /// `column <op> constant`
    Compare {
        /// Comparison operator.
        op: CompareOp,
        /// Right-hand constant.
        constant: Value,
    },
    /// `column IS NULL`
    IsNull,
    /// `column IS NOT NULL`
    IsNotNull,
    /// Every child filter must match.
    And(Vec<TableFilter>),
}

impl TableFilter {
    /// Creates a comparison against a constant.
    pub fn compare(op: CompareOp, constant: impl Into<Value>) -> Self {
        Self::Compare {
            op,
            constant: constant.into(),
        }
    }

    /// Evaluates the filter for one value.
    ///
    /// Returns `None` when the value and the constant cannot be compared;
    /// the caller keeps the row and re-applies the filter itself.
    pub fn evaluate(&self, value: &Value) -> Option<bool> {
        match self {
            Self::Compare { op, constant } => {
                if value.is_null() || constant.is_null() {
                    return Some(false);
                }
                value.try_compare(constant).map(|ordering| op.matches(ordering))
            }
            Self::IsNull => Some(value.is_null()),
            Self::IsNotNull => Some(!value.is_null()),
            Self::And(children) => {
                let mut decided = true;
                for child in children {
                    match child.evaluate(value) {
                        Some(false) => return Some(false),
                        Some(true) => {}
                        None => decided = false,
                    }
                }
                decided.then_some(true)
            }
        }
    }

    /// Checks the filter against a segment's zone map.
    pub fn check_zonemap(&self, stats: &ColumnStatistics) -> FilterPropagateResult {
        use FilterPropagateResult::{AlwaysFalse, AlwaysTrue, NoPruningPossible};

        match self {
            Self::IsNull => {
                if !stats.has_null() {
                    AlwaysFalse
                } else if stats.null_count() == stats.value_count() {
                    AlwaysTrue
                } else {
                    NoPruningPossible
                }
            }
            Self::IsNotNull => {
                if !stats.has_non_null() {
                    AlwaysFalse
                } else if !stats.has_null() {
                    AlwaysTrue
                } else {
                    NoPruningPossible
                }
            }
            Self::Compare { op, constant } => {
                if constant.is_null() {
                    return AlwaysFalse;
                }
                let (Some(min), Some(max)) = (stats.min(), stats.max()) else {
                    // only NULLs, which never compare true
                    return AlwaysFalse;
                };
                let (Some(vs_min), Some(vs_max)) =
                    (constant.try_compare(min), constant.try_compare(max))
                else {
                    return NoPruningPossible;
                };
                let no_null = !stats.has_null();
                let all_equal = vs_min == Ordering::Equal && vs_max == Ordering::Equal;
                let (never, always) = match op {
                    CompareOp::Equal => (
                        vs_min == Ordering::Less || vs_max == Ordering::Greater,
                        all_equal,
                    ),
                    CompareOp::NotEqual => (
                        all_equal,
                        vs_min == Ordering::Less || vs_max == Ordering::Greater,
                    ),
                    // column < constant
                    CompareOp::LessThan => (vs_min != Ordering::Greater, vs_max == Ordering::Greater),
                    CompareOp::LessThanOrEqual => {
                        (vs_min == Ordering::Less, vs_max != Ordering::Less)
                    }
                    // column > constant
                    CompareOp::GreaterThan => (vs_max != Ordering::Less, vs_min == Ordering::Less),
                    CompareOp::GreaterThanOrEqual => {
                        (vs_max == Ordering::Greater, vs_min != Ordering::Greater)
                    }
                };
                if never {
                    AlwaysFalse
                } else if always && no_null {
                    AlwaysTrue
                } else {
                    NoPruningPossible
                }
            }
            Self::And(children) => {
                let mut result = AlwaysTrue;
                for child in children {
                    match child.check_zonemap(stats) {
                        AlwaysFalse => return AlwaysFalse,
                        NoPruningPossible => result = NoPruningPossible,
                        AlwaysTrue => {}
                    }
                }
                result
            }
        }
    }
}

impl fmt::Display for TableFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compare { op, constant } => write!(f, "{} {}", op, constant),
            Self::IsNull => f.write_str("IS NULL"),
            Self::IsNotNull => f.write_str("IS NOT NULL"),
            Self::And(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" AND ")?;
                    }
                    write!(f, "{}", child)?;
                }
                Ok(())
            }
        }
    }
}

/// Filters of a scan, keyed by position in the scan's column list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableFilterSet {
    filters: BTreeMap<usize, TableFilter>,
}

impl TableFilterSet {
    /// Creates an empty filter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter on the scan column at `position`.
    ///
    /// A second filter on the same column is combined with the first.
    pub fn push(&mut self, position: usize, filter: TableFilter) {
        match self.filters.remove(&position) {
            None => {
                self.filters.insert(position, filter);
            }
            Some(TableFilter::And(mut children)) => {
                children.push(filter);
                self.filters.insert(position, TableFilter::And(children));
            }
            Some(existing) => {
                self.filters
                    .insert(position, TableFilter::And(vec![existing, filter]));
            }
        }
    }

    /// Builder form of [`TableFilterSet::push`].
    #[must_use]
    pub fn with_filter(mut self, position: usize, filter: TableFilter) -> Self {
        self.push(position, filter);
        self
    }

    /// Returns the filter on the scan column at `position`.
    pub fn get(&self, position: usize) -> Option<&TableFilter> {
        self.filters.get(&position)
    }

    /// Iterates over `(position, filter)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &TableFilter)> {
        self.filters.iter().map(|(&position, filter)| (position, filter))
    }

    /// Returns the number of filtered columns.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Returns true if no column is filtered.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
