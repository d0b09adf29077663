//! Sequential, parallel and index-build scans, and fetches by row id.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use quarry_common::constants::COLUMN_IDENTIFIER_ROW_ID;
use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{DataChunk, RowId, TransactionData};
use tracing::debug;

use super::DataTable;
use crate::filter::TableFilterSet;
use crate::index::{Index, IndexId};
use crate::segment_tree::SegmentNode;
use crate::state::{
    ColumnFetchState, CreateIndexScanState, ParallelTableScanState, ScanUnit, TableScanState,
    TableScanType,
};

impl DataTable {
    fn check_scan_columns(
        &self,
        column_ids: &[usize],
        filters: Option<&TableFilterSet>,
    ) -> QuarryResult<()> {
        self.output_types(column_ids)?;
        if let Some(filters) = filters {
            if let Some((position, _)) = filters.iter().find(|(p, _)| *p >= column_ids.len()) {
                return Err(QuarryError::invalid_argument(format!(
                    "filter on scan column {} but only {} columns are scanned",
                    position,
                    column_ids.len()
                )));
            }
        }
        Ok(())
    }

    /// Starts a scan of `column_ids` that any transaction may drive.
    pub fn initialize_scan(
        &self,
        column_ids: Vec<usize>,
        filters: Option<TableFilterSet>,
    ) -> QuarryResult<TableScanState> {
        self.check_scan_columns(&column_ids, filters.as_ref())?;
        Ok(TableScanState::new(
            column_ids,
            filters,
            self.row_groups.snapshot(),
            0..u64::MAX,
        ))
    }

    /// Starts a scan bound to `txn`.
    ///
    /// Driving it with another transaction is an error.
    pub fn initialize_scan_with(
        &self,
        txn: &TransactionData,
        column_ids: Vec<usize>,
        filters: Option<TableFilterSet>,
    ) -> QuarryResult<TableScanState> {
        let mut state = self.initialize_scan(column_ids, filters)?;
        state.transaction = Some(*txn);
        Ok(state)
    }

    /// Starts a scan of exactly rows `[start_row, end_row)`, ignoring
    /// versions.
    pub fn initialize_scan_with_offset(
        &self,
        column_ids: Vec<usize>,
        start_row: u64,
        end_row: u64,
    ) -> QuarryResult<TableScanState> {
        self.check_scan_columns(&column_ids, None)?;
        let row_groups = self.row_groups.snapshot();
        let first = row_groups.partition_point(|rg| rg.start() + rg.count() as u64 <= start_row);
        let vector_index = row_groups.get(first).map_or(0, |rg| {
            (start_row.saturating_sub(rg.start()) as usize) / rg.vector_size()
        });
        let mut state = TableScanState::new(
            column_ids,
            None,
            row_groups[first..].to_vec(),
            start_row..end_row,
        );
        state.vector_index = vector_index;
        state.check_versions = false;
        Ok(state)
    }

    /// Produces the next batch of visible rows into `result`.
    ///
    /// An empty `result` means the scan is exhausted. Returns false when a
    /// pushed-down filter could not be decided for some row; the caller must
    /// then re-apply the filters to `result`.
    pub fn scan(
        &self,
        txn: &TransactionData,
        result: &mut DataChunk,
        state: &mut TableScanState,
    ) -> QuarryResult<bool> {
        if let Some(bound) = &state.transaction {
            if bound != txn {
                return Err(QuarryError::invalid_argument(format!(
                    "scan bound to {} driven by {}",
                    bound.transaction_id, txn.transaction_id
                )));
            }
        }
        loop {
            let Some(row_group) = state.row_groups.get(state.current).cloned() else {
                *result = DataChunk::new(&self.output_types(&state.column_ids)?);
                return Ok(true);
            };

            if !state.zonemap_checked {
                state.zonemap_checked = true;
                if let Some(filters) = &state.filters {
                    if !row_group.check_zonemap(&state.column_ids, filters)? {
                        state.row_groups_skipped += 1;
                        debug!(start = row_group.start(), "row group pruned by zone map");
                        state.next_row_group();
                        continue;
                    }
                }
            }

            let start = row_group.start();
            let vector_size = row_group.vector_size();
            let available = (row_group.count() as u64)
                .min(state.row_range.end.saturating_sub(start)) as usize;
            let lower = state.row_range.start.saturating_sub(start) as usize;
            let offset = (state.vector_index * vector_size).max(lower);
            let past_unit = state
                .vector_end
                .map_or(false, |end| state.vector_index >= end);
            if offset >= available || past_unit {
                state.next_row_group();
                continue;
            }
            let count = ((state.vector_index + 1) * vector_size).min(available) - offset;
            state.vector_index += 1;

            let batch = row_group.scan(
                txn,
                offset,
                count,
                &state.column_ids,
                state.filters.as_ref(),
                state.check_versions,
                &mut state.selection,
            )?;
            if batch.size == 0 {
                continue;
            }
            state.rows_scanned += batch.size as u64;
            *result = DataChunk::with_size(batch.columns, batch.size)?;
            return Ok(batch.all_filters_applied);
        }
    }

    /// Produces rows `[start_row, start_row + count)` in vector-sized
    /// chunks regardless of visibility.
    ///
    /// `callback` receives each chunk and the row id of its first row.
    pub fn scan_table_segment<F>(&self, start_row: u64, count: usize, mut callback: F) -> QuarryResult<()>
    where
        F: FnMut(&DataChunk, u64) -> QuarryResult<()>,
    {
        let column_ids: Vec<usize> = (0..self.types.len()).collect();
        let end_row = start_row + count as u64;
        let mut state = self.initialize_scan_with_offset(column_ids, start_row, end_row)?;
        let view = TransactionData::latest();
        let mut chunk = DataChunk::new(&self.types);
        let mut row = start_row;
        loop {
            self.scan(&view, &mut chunk, &mut state)?;
            if chunk.is_empty() {
                return Ok(());
            }
            callback(&chunk, row)?;
            row += chunk.size() as u64;
        }
    }

    // =========================================================================
    // Parallel Scan
    // =========================================================================

    /// Returns the recommended number of parallel scan workers.
    pub fn max_threads(&self) -> usize {
        let config = self.info.config();
        let rows_per_unit = (config.parallel_scan_vector_count * config.vector_size) as u64;
        (self.total_rows() / rows_per_unit) as usize + 1
    }

    /// Splits the table into work units for a parallel scan.
    pub fn initialize_parallel_scan(
        &self,
        column_ids: Vec<usize>,
        filters: Option<TableFilterSet>,
    ) -> QuarryResult<ParallelTableScanState> {
        self.check_scan_columns(&column_ids, filters.as_ref())?;
        let per_unit = self.info.config().parallel_scan_vector_count;
        let row_groups = self.row_groups.snapshot();
        let mut units = Vec::new();
        for (index, row_group) in row_groups.iter().enumerate() {
            let mut vectors = row_group.vector_count();
            if index + 1 == row_groups.len() {
                // the tail may still grow
                vectors = row_group.capacity().div_ceil(row_group.vector_size());
            }
            let mut start = 0;
            while start < vectors {
                let end = (start + per_unit).min(vectors);
                units.push(ScanUnit {
                    row_group: Arc::clone(row_group),
                    vectors: start..end,
                });
                start = end;
            }
        }
        debug!(
            table = %self.info.qualified_name(),
            units = units.len(),
            "parallel scan initialized"
        );
        Ok(ParallelTableScanState {
            column_ids,
            filters: filters.filter(|f| !f.is_empty()),
            units,
            next: AtomicUsize::new(0),
            max_row: self.total_rows(),
        })
    }

    /// Creates the local cursor of one parallel scan worker.
    pub fn initialize_local_scan(&self, parallel: &ParallelTableScanState) -> TableScanState {
        TableScanState::new(
            parallel.column_ids.clone(),
            parallel.filters.clone(),
            Vec::new(),
            0..parallel.max_row,
        )
    }

    /// Claims the next unscanned work unit for `state`.
    ///
    /// Returns false when every unit has been claimed.
    pub fn next_parallel_scan(
        &self,
        parallel: &ParallelTableScanState,
        state: &mut TableScanState,
    ) -> bool {
        match parallel.claim() {
            Some(unit) => {
                state.assign(unit);
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Fetch
    // =========================================================================

    /// Fetches the rows `row_ids` that `txn` can see into `result`.
    ///
    /// Invisible rows are skipped.
    pub fn fetch(
        &self,
        txn: &TransactionData,
        result: &mut DataChunk,
        column_ids: &[usize],
        row_ids: &[RowId],
        state: &mut ColumnFetchState,
    ) -> QuarryResult<()> {
        let types = self.output_types(column_ids)?;
        let total_rows = self.total_rows();
        let mut rows = Vec::with_capacity(row_ids.len());
        for &row_id in row_ids {
            let row = row_id.as_u64();
            let cached = state
                .row_group
                .as_ref()
                .filter(|rg| rg.start() <= row && row < rg.start() + rg.count() as u64)
                .cloned();
            let row_group = match cached.or_else(|| self.row_groups.find(row)) {
                Some(row_group) => row_group,
                None => return Err(QuarryError::RowOutOfRange { row_id, total_rows }),
            };
            let offset = (row - row_group.start()) as usize;
            if let Some(values) = row_group.fetch_row(txn, offset, column_ids)? {
                rows.push(values);
            }
            state.row_group = Some(row_group);
        }
        state.rows_fetched += rows.len() as u64;
        *result = DataChunk::from_rows(&types, &rows)?;
        Ok(())
    }

    // =========================================================================
    // Index Builds
    // =========================================================================

    /// Starts a scan for building an index.
    ///
    /// The returned state holds the append lock until dropped.
    pub fn initialize_create_index_scan(
        &self,
        scan_type: TableScanType,
        column_ids: Vec<usize>,
    ) -> QuarryResult<CreateIndexScanState<'_>> {
        let lock = self.append_lock.lock();
        let scan = self.initialize_scan(column_ids, None)?;
        let view = match scan_type {
            TableScanType::CommittedRows => TransactionData::committed(),
            TableScanType::LatestRows => TransactionData::latest(),
        };
        Ok(CreateIndexScanState {
            scan,
            view,
            scan_type,
            _lock: lock,
        })
    }

    /// Produces the next batch of a create-index scan. An empty `result`
    /// means the scan is exhausted.
    pub fn create_index_scan(
        &self,
        state: &mut CreateIndexScanState<'_>,
        result: &mut DataChunk,
    ) -> QuarryResult<()> {
        let view = state.view;
        self.scan(&view, result, &mut state.scan)?;
        Ok(())
    }

    /// Fills `index` from the table's rows and attaches it.
    ///
    /// Every appended row gets an entry except those whose deletion is
    /// committed, matching what appends and deletes maintain. Refused while
    /// deletes or updates of the table are pending, since their commit or
    /// rollback would not cover the new index.
    pub fn add_index(&self, index: Arc<dyn Index>) -> QuarryResult<IndexId> {
        let key_columns = index.column_ids().to_vec();
        for &column in &key_columns {
            self.check_column(column)?;
        }
        let mut column_ids = key_columns.clone();
        column_ids.push(COLUMN_IDENTIFIER_ROW_ID);
        let key_count = key_columns.len();
        let key_positions: Vec<usize> = (0..key_count).collect();

        let _lock = self.append_lock.lock();
        let pending = self.info.undo().pending_transactions();
        if pending > 0 {
            return Err(QuarryError::not_supported(format!(
                "adding index '{}' while {} transactions have pending deletes or updates",
                index.name(),
                pending
            )));
        }
        let mut state = self.initialize_scan_with_offset(column_ids, 0, self.total_rows())?;
        let view = TransactionData::latest();
        let mut chunk = DataChunk::new(&[]);
        let mut indexed = 0usize;
        loop {
            self.scan(&view, &mut chunk, &mut state)?;
            if chunk.is_empty() {
                break;
            }
            let mut row_ids = Vec::with_capacity(chunk.size());
            let mut live = Vec::with_capacity(chunk.size());
            for (position, value) in chunk.column(key_count).iter().enumerate() {
                let row = value
                    .as_i64()
                    .ok_or_else(|| QuarryError::internal("row id column holds a non-integer"))?
                    as u64;
                let deleted = self.row_groups.find(row).map_or(true, |row_group| {
                    row_group
                        .versions()
                        .is_deleted_committed((row - row_group.start()) as usize)
                });
                if !deleted {
                    live.push(position);
                    row_ids.push(RowId::new(row));
                }
            }
            let keys = chunk.project(&key_positions)?.select(&live);
            index.append(&keys, &row_ids)?;
            indexed += row_ids.len();
        }
        let id = self.info.indexes().add_index(Arc::clone(&index));
        debug!(
            table = %self.info.qualified_name(),
            index = %index.name(),
            rows = indexed,
            "index created"
        );
        Ok(id)
    }
}
