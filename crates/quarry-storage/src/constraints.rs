//! Table constraint verification.
//!
//! Constraints are bound by the catalog and handed to the table with every
//! append, update and delete. They are checked before any row group is
//! mutated, so a failing constraint never needs a rollback.

use std::fmt;
use std::sync::Arc;

use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{DataChunk, RowId, Value};

/// Constraint checks the table runs ahead of each mutation.
pub trait TableConstraints: Send + Sync {
    /// Verifies a chunk about to be appended.
    fn verify_append(&self, chunk: &DataChunk) -> QuarryResult<()>;

    /// Verifies updated values.
    ///
    /// `updates` holds one vector per entry of `column_ids`; only the touched
    /// columns are present.
    fn verify_update(&self, updates: &DataChunk, column_ids: &[usize]) -> QuarryResult<()>;

    /// Verifies rows about to be deleted.
    fn verify_delete(&self, _row_ids: &[RowId]) -> QuarryResult<()> {
        Ok(())
    }
}

/// A table without constraints. Used by log replay.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConstraints;

impl TableConstraints for NoConstraints {
    fn verify_append(&self, _chunk: &DataChunk) -> QuarryResult<()> {
        Ok(())
    }

    fn verify_update(&self, _updates: &DataChunk, _column_ids: &[usize]) -> QuarryResult<()> {
        Ok(())
    }
}

/// Predicate of a CHECK constraint over the values of its columns.
pub type CheckPredicate = Arc<dyn Fn(&[Value]) -> bool + Send + Sync>;

/// A bound CHECK constraint.
#[derive(Clone)]
pub struct CheckConstraint {
    name: String,
    columns: Vec<usize>,
    predicate: CheckPredicate,
}

impl CheckConstraint {
    /// Creates a CHECK constraint over `columns`.
    ///
    /// The predicate receives the row's values of `columns`, in order.
    pub fn new(
        name: impl Into<String>,
        columns: Vec<usize>,
        predicate: impl Fn(&[Value]) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            predicate: Arc::new(predicate),
        }
    }

    /// Returns the constraint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the table columns the constraint reads.
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    fn violation(&self) -> QuarryError {
        QuarryError::constraint(format!("CHECK constraint failed: {}", self.name))
    }
}

impl fmt::Debug for CheckConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckConstraint")
            .field("name", &self.name)
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

/// NOT NULL and CHECK constraints of a table.
///
/// # Example
///
/// ```rust
/// use quarry_common::types::{DataChunk, LogicalType, Value};
/// use quarry_storage::constraints::{BoundConstraints, CheckConstraint, TableConstraints};
///
/// let constraints = BoundConstraints::new()
///     .with_not_null(0)
///     .with_check(CheckConstraint::new("positive", vec![1], |v| {
///         v[0].as_i64().map_or(true, |x| x > 0)
///     }));
/// let chunk = DataChunk::from_rows(
///     &[LogicalType::Integer, LogicalType::Integer],
///     &[vec![Value::Integer(1), Value::Integer(-5)]],
/// ).unwrap();
/// assert!(constraints.verify_append(&chunk).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct BoundConstraints {
    not_null: Vec<usize>,
    checks: Vec<CheckConstraint>,
}

impl BoundConstraints {
    /// Creates an empty constraint set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a NOT NULL constraint on `column`.
    #[must_use]
    pub fn with_not_null(mut self, column: usize) -> Self {
        if !self.not_null.contains(&column) {
            self.not_null.push(column);
        }
        self
    }

    /// Adds a CHECK constraint.
    #[must_use]
    pub fn with_check(mut self, check: CheckConstraint) -> Self {
        self.checks.push(check);
        self
    }

    /// Returns true if there are no constraints.
    pub fn is_empty(&self) -> bool {
        self.not_null.is_empty() && self.checks.is_empty()
    }

    fn verify_not_null(column: usize, values: &[Value]) -> QuarryResult<()> {
        if values.iter().any(Value::is_null) {
            return Err(QuarryError::constraint(format!(
                "NOT NULL constraint failed: column {}",
                column
            )));
        }
        Ok(())
    }

    /// Evaluates `check` with its columns found at `positions` of `chunk`.
    fn verify_check(
        check: &CheckConstraint,
        chunk: &DataChunk,
        positions: &[usize],
    ) -> QuarryResult<()> {
        let mut args = Vec::with_capacity(positions.len());
        for row in 0..chunk.size() {
            args.clear();
            args.extend(
                positions
                    .iter()
                    .map(|&p| chunk.column(p).get(row).cloned().unwrap_or(Value::Null)),
            );
            if !(check.predicate)(&args) {
                return Err(check.violation());
            }
        }
        Ok(())
    }
}

impl TableConstraints for BoundConstraints {
    fn verify_append(&self, chunk: &DataChunk) -> QuarryResult<()> {
        for &column in &self.not_null {
            if column >= chunk.column_count() {
                return Err(QuarryError::internal(format!(
                    "NOT NULL constraint on missing column {}",
                    column
                )));
            }
            Self::verify_not_null(column, chunk.column(column).values())?;
        }
        for check in &self.checks {
            if let Some(&bad) = check.columns.iter().find(|&&c| c >= chunk.column_count()) {
                return Err(QuarryError::internal(format!(
                    "CHECK constraint {} reads missing column {}",
                    check.name, bad
                )));
            }
            Self::verify_check(check, chunk, &check.columns)?;
        }
        Ok(())
    }

    fn verify_update(&self, updates: &DataChunk, column_ids: &[usize]) -> QuarryResult<()> {
        for (position, column) in column_ids.iter().enumerate() {
            if self.not_null.contains(column) {
                Self::verify_not_null(*column, updates.column(position).values())?;
            }
        }
        for check in &self.checks {
            if !check.columns.iter().any(|c| column_ids.contains(c)) {
                continue;
            }
            let positions = check
                .columns
                .iter()
                .map(|c| {
                    column_ids.iter().position(|id| id == c).ok_or_else(|| {
                        QuarryError::internal(format!(
                            "update is missing column {} required by CHECK constraint {}",
                            c, check.name
                        ))
                    })
                })
                .collect::<QuarryResult<Vec<_>>>()?;
            Self::verify_check(check, updates, &positions)?;
        }
        Ok(())
    }
}
