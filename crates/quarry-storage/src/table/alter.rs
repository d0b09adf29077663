//! Schema changes.
//!
//! Each change builds a new generation from the current root. The new
//! generation's row groups are sealed copies of the parent's that share
//! its stored segments and version info; added and retyped columns become
//! derived columns evaluated from the parent's data.

use std::sync::Arc;

use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::LogicalType;
use tracing::info;

use super::DataTable;
use crate::expression::Expression;
use crate::row_group::{DerivedColumn, RowGroup, RowGroupColumn};
use crate::statistics::ColumnStatistics;

impl DataTable {
    /// Builds a generation with one more column whose existing rows take
    /// the value of `default`.
    pub fn add_column(
        parent: &DataTable,
        column_type: LogicalType,
        default: Arc<dyn Expression>,
    ) -> QuarryResult<DataTable> {
        if default.return_type() != &column_type {
            return Err(QuarryError::type_mismatch(&column_type, default.return_type()));
        }
        let _lock = parent.append_lock.lock();
        parent.ensure_root("altered")?;

        let row_groups = parent.inherit_row_groups(|source| {
            let mut columns = source.columns().to_vec();
            columns.push(RowGroupColumn::Derived(Arc::new(DerivedColumn::new(
                Arc::clone(source),
                Vec::new(),
                Arc::clone(&default),
            ))));
            Ok(columns)
        })?;
        let mut types = parent.types.clone();
        types.push(column_type.clone());
        let mut stats = parent.column_stats.lock().clone();
        stats.push(ColumnStatistics::new(column_type.clone()));

        parent.freeze();
        info!(
            table = %parent.info.qualified_name(),
            column = types.len() - 1,
            column_type = %column_type,
            "column added"
        );
        Ok(DataTable::from_parts(
            Arc::clone(&parent.info),
            types,
            row_groups,
            stats,
            false,
        ))
    }

    /// Builds a generation without column `column`.
    ///
    /// Rejected while an index reads the column or any column after it.
    pub fn drop_column(parent: &DataTable, column: usize) -> QuarryResult<DataTable> {
        parent.check_column(column)?;
        if parent.types.len() == 1 {
            return Err(QuarryError::invalid_argument(format!(
                "cannot drop the only column of table '{}'",
                parent.info.qualified_name()
            )));
        }
        let _lock = parent.append_lock.lock();
        parent.ensure_root("altered")?;
        if parent.info.indexes().depends_on(column) {
            return Err(QuarryError::DependencyViolation {
                column,
                reason: "an index depends on it".to_string(),
            });
        }
        if parent.info.indexes().max_column().map_or(false, |max| max > column) {
            return Err(QuarryError::DependencyViolation {
                column,
                reason: "an index depends on a column after it".to_string(),
            });
        }

        let row_groups = parent.inherit_row_groups(|source| {
            let mut columns = source.columns().to_vec();
            columns.remove(column);
            Ok(columns)
        })?;
        let mut types = parent.types.clone();
        types.remove(column);
        let mut stats = parent.column_stats.lock().clone();
        stats.remove(column);

        parent.freeze();
        info!(table = %parent.info.qualified_name(), column, "column dropped");
        Ok(DataTable::from_parts(
            Arc::clone(&parent.info),
            types,
            row_groups,
            stats,
            false,
        ))
    }

    /// Builds a generation where column `column` holds `cast` evaluated
    /// over the parent's `bound_columns`.
    ///
    /// Existing rows are converted before this returns, so a failing cast
    /// leaves the parent untouched.
    pub fn alter_column_type(
        parent: &DataTable,
        column: usize,
        target_type: LogicalType,
        bound_columns: Vec<usize>,
        cast: Arc<dyn Expression>,
    ) -> QuarryResult<DataTable> {
        parent.check_column(column)?;
        for &bound in &bound_columns {
            parent.check_column(bound)?;
        }
        if cast.return_type() != &target_type {
            return Err(QuarryError::type_mismatch(&target_type, cast.return_type()));
        }
        let _lock = parent.append_lock.lock();
        parent.ensure_root("altered")?;
        if parent.info.indexes().depends_on(column) {
            return Err(QuarryError::DependencyViolation {
                column,
                reason: "an index depends on it".to_string(),
            });
        }

        let mut stats = ColumnStatistics::new(target_type.clone());
        let row_groups = parent.inherit_row_groups(|source| {
            let derived = Arc::new(DerivedColumn::new(
                Arc::clone(source),
                bound_columns.clone(),
                Arc::clone(&cast),
            ));
            let mut columns = source.columns().to_vec();
            columns[column] = RowGroupColumn::Derived(derived);
            Ok(columns)
        })?;
        for row_group in &row_groups {
            row_group.merge_statistics(column, &mut stats)?;
        }
        let mut types = parent.types.clone();
        types[column] = target_type.clone();
        let mut column_stats = parent.column_stats.lock().clone();
        column_stats[column] = ColumnStatistics::new(target_type.clone());

        parent.freeze();
        info!(
            table = %parent.info.qualified_name(),
            column,
            column_type = %target_type,
            values = stats.value_count(),
            "column type altered"
        );
        Ok(DataTable::from_parts(
            Arc::clone(&parent.info),
            types,
            row_groups,
            column_stats,
            false,
        ))
    }

    fn inherit_row_groups<F>(&self, mut columns: F) -> QuarryResult<Vec<Arc<RowGroup>>>
    where
        F: FnMut(&Arc<RowGroup>) -> QuarryResult<Vec<RowGroupColumn>>,
    {
        self.row_groups
            .snapshot()
            .iter()
            .filter(|source| source.count() > 0)
            .map(|source| Ok(Arc::new(RowGroup::inherit(source, columns(source)?))))
            .collect()
    }
}
