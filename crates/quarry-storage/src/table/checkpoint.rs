//! Checkpoint, load, drop hooks and storage diagnostics.

use std::collections::BTreeSet;
use std::sync::Arc;

use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{BlockId, CommitId, TransactionData};
use tracing::{debug, info, warn};

use super::DataTable;
use crate::block::BlockManager;
use crate::checkpoint::{
    free_blocks, BlockPointer, PersistentTableData, RowGroupDescription, TableDataWriter,
    TableDescription,
};
use crate::info::DataTableInfo;
use crate::row_group::{RowGroup, RowGroupColumn};
use crate::segment::{ColumnSegment, CompressionType, DataPointer};
use crate::segment_tree::SegmentNode;
use crate::statistics::ColumnStatistics;
use crate::version::VersionInfo;

/// One row of [`DataTable::get_storage_info`].
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSegmentInfo {
    /// Position of the row group.
    pub row_group_index: usize,
    /// Column index.
    pub column_id: usize,
    /// Column path, e.g. `[2]`.
    pub column_path: String,
    /// Column type.
    pub segment_type: String,
    /// First row id of the segment.
    pub segment_start: u64,
    /// Rows in the segment.
    pub segment_count: usize,
    /// Encoding of the persisted segment.
    pub compression: String,
    /// Zone-map statistics.
    pub statistics: String,
    /// True if the segment carries update undo entries.
    pub has_updates: bool,
    /// True if the segment was checkpointed or loaded.
    pub persistent: bool,
    /// First block of the persisted segment.
    pub block_id: Option<BlockId>,
}

struct WrittenCheckpoint {
    pointer: BlockPointer,
    table_blocks: Vec<BlockId>,
    segments: Vec<(Arc<ColumnSegment>, DataPointer)>,
}

impl DataTable {
    /// Writes the committed contents of the table through `writer`.
    ///
    /// Holds the append lock for the whole checkpoint; readers are not
    /// blocked. Only the committed prefix of the row groups is written.
    /// Blocks of the previous checkpoint are freed once the new one is
    /// complete.
    pub fn checkpoint(&self, writer: &TableDataWriter) -> QuarryResult<BlockPointer> {
        let _lock = self.append_lock.lock();
        info!(table = %self.info.qualified_name(), "checkpoint started");

        let mut written = Vec::new();
        let checkpoint = match self.write_checkpoint(writer, &mut written) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                let freed = writer.free(&written);
                warn!(
                    table = %self.info.qualified_name(),
                    error = %e,
                    freed,
                    "checkpoint failed"
                );
                return Err(e);
            }
        };

        let previous = self.info.block_manager();
        let mut stale = Vec::new();
        for (segment, pointer) in checkpoint.segments {
            if let Some(old) = segment.set_data_pointer(Some(pointer)) {
                stale.extend(old.blocks);
            }
        }
        stale.extend(self.info.replace_table_blocks(checkpoint.table_blocks));
        let freed = previous.map_or(0, |manager| free_blocks(manager.as_ref(), &stale));
        self.info.set_block_manager(Arc::clone(writer.manager()));

        info!(
            table = %self.info.qualified_name(),
            pointer = %checkpoint.pointer,
            blocks = written.len(),
            freed,
            "checkpoint finished"
        );
        Ok(checkpoint.pointer)
    }

    fn write_checkpoint(
        &self,
        writer: &TableDataWriter,
        written: &mut Vec<BlockId>,
    ) -> QuarryResult<WrittenCheckpoint> {
        let view = TransactionData::committed();
        let mut row_groups = Vec::new();
        let mut segments = Vec::new();

        for row_group in self.row_groups.snapshot() {
            let count = row_group.count();
            let committed = row_group.committed_count();
            if committed == 0 {
                break;
            }
            let mut columns = Vec::with_capacity(self.types.len());
            for column in 0..self.types.len() {
                let segment = row_group.column_segment(column)?;
                let values = segment.scan(&view, 0, committed);
                let pointer = writer.write_segment(&self.types[column], values.values())?;
                written.extend(pointer.blocks.iter().copied());
                columns.push(pointer.clone());
                segments.push((segment, pointer));
            }
            let deleted = (0..committed)
                .filter(|&offset| row_group.versions().is_deleted_committed(offset))
                .collect();
            row_groups.push(RowGroupDescription {
                start: row_group.start(),
                capacity: row_group.capacity(),
                count: committed,
                deleted,
                columns,
            });
            if committed < count {
                debug!(
                    table = %self.info.qualified_name(),
                    start = row_group.start(),
                    uncommitted = count - committed,
                    "checkpoint stops at uncommitted rows"
                );
                break;
            }
        }

        let description = TableDescription {
            schema: self.info.schema(),
            table: self.info.table(),
            types: &self.types,
            row_groups,
        };
        let (pointer, table_blocks) = writer.write_table(&description)?;
        written.extend(table_blocks.iter().copied());
        Ok(WrittenCheckpoint {
            pointer,
            table_blocks,
            segments,
        })
    }

    /// Builds a root table from checkpointed data.
    ///
    /// Loaded rows are committed with [`CommitId::LOADED`] and stay visible to
    /// every transaction; committed deletes are restored.
    pub fn from_persistent(
        info: Arc<DataTableInfo>,
        manager: Arc<dyn BlockManager>,
        data: PersistentTableData,
    ) -> QuarryResult<DataTable> {
        if data.schema != info.schema() || data.table != info.table() {
            return Err(QuarryError::invalid_argument(format!(
                "persisted table '{}.{}' cannot be loaded as '{}'",
                data.schema,
                data.table,
                info.qualified_name()
            )));
        }
        if data.types.is_empty() {
            return Err(QuarryError::corruption(format!(
                "persisted table '{}' has no columns",
                info.qualified_name()
            )));
        }
        let vector_size = info.config().vector_size;
        let mut stats: Vec<ColumnStatistics> =
            data.types.iter().cloned().map(ColumnStatistics::new).collect();
        let mut row_groups = Vec::with_capacity(data.row_groups.len());
        let mut expected_start = 0;

        for persisted in data.row_groups {
            if persisted.start != expected_start {
                return Err(QuarryError::corruption(format!(
                    "row group starts at {}, expected {}",
                    persisted.start, expected_start
                )));
            }
            let versions = VersionInfo::new(persisted.capacity, vector_size);
            versions.append(CommitId::LOADED.as_u64(), 0, persisted.count);
            for &offset in &persisted.deleted {
                versions.restore_delete(offset, CommitId::LOADED);
            }
            let segments = persisted
                .columns
                .into_iter()
                .zip(&data.types)
                .enumerate()
                .map(|(column, (persisted_column, ty))| {
                    stats[column].update_all(&persisted_column.values);
                    let segment =
                        ColumnSegment::from_values(ty.clone(), persisted.start, persisted_column.values);
                    segment.set_data_pointer(Some(persisted_column.pointer));
                    Arc::new(segment)
                })
                .collect();
            let row_group = RowGroup::from_segments(
                persisted.start,
                persisted.capacity,
                vector_size,
                persisted.count,
                segments,
                versions,
            )?;
            expected_start = persisted.start + persisted.count as u64;
            row_groups.push(Arc::new(row_group));
        }

        info.set_cardinality(expected_start);
        info.set_block_manager(manager);
        info.replace_table_blocks(data.table_blocks);
        let table = DataTable::from_parts(info, data.types, row_groups, stats, true);
        info!(
            table = %table.info.qualified_name(),
            rows = table.total_rows(),
            row_groups = table.row_group_count(),
            "table loaded"
        );
        Ok(table)
    }

    /// Frees every block of the table's persisted data.
    ///
    /// Called once the drop is committed. Returns the number of blocks freed.
    pub fn commit_drop_table(&self) -> QuarryResult<usize> {
        let Some(manager) = self.info.block_manager() else {
            return Ok(0);
        };
        let mut blocks: BTreeSet<BlockId> = self.info.replace_table_blocks(Vec::new()).into_iter().collect();
        for row_group in self.row_groups.snapshot() {
            for column in row_group.columns() {
                blocks.extend(take_blocks(column));
            }
        }
        let blocks: Vec<_> = blocks.into_iter().collect();
        let freed = free_blocks(manager.as_ref(), &blocks);
        info!(table = %self.info.qualified_name(), freed, "dropped table storage");
        Ok(freed)
    }

    /// Frees the persisted blocks of column `column` of this generation.
    ///
    /// Called on the parent once a drop of the column is committed.
    pub fn commit_drop_column(&self, column: usize) -> QuarryResult<usize> {
        self.check_column(column)?;
        let Some(manager) = self.info.block_manager() else {
            return Ok(0);
        };
        let blocks: BTreeSet<BlockId> = self
            .row_groups
            .snapshot()
            .iter()
            .flat_map(|row_group| take_blocks(&row_group.columns()[column]))
            .collect();
        let blocks: Vec<_> = blocks.into_iter().collect();
        let freed = free_blocks(manager.as_ref(), &blocks);
        info!(table = %self.info.qualified_name(), column, freed, "dropped column storage");
        Ok(freed)
    }

    /// Describes every column segment of the table.
    pub fn get_storage_info(&self) -> Vec<ColumnSegmentInfo> {
        let mut result = Vec::new();
        for (row_group_index, row_group) in self.row_groups.snapshot().iter().enumerate() {
            for (column_id, column) in row_group.columns().iter().enumerate() {
                let base = ColumnSegmentInfo {
                    row_group_index,
                    column_id,
                    column_path: format!("[{}]", column_id),
                    segment_type: column.logical_type().to_string(),
                    segment_start: row_group.start(),
                    segment_count: row_group.count(),
                    compression: String::new(),
                    statistics: String::new(),
                    has_updates: false,
                    persistent: false,
                    block_id: None,
                };
                let info = match column.segment() {
                    Some(segment) => {
                        let pointer = segment.data_pointer();
                        ColumnSegmentInfo {
                            segment_count: segment.count(),
                            compression: pointer
                                .as_ref()
                                .map_or(CompressionType::Uncompressed, |p| p.compression)
                                .to_string(),
                            statistics: segment.statistics().to_string(),
                            has_updates: segment.has_updates(),
                            persistent: pointer.is_some(),
                            block_id: pointer.map(|p| p.block_id),
                            ..base
                        }
                    }
                    None => ColumnSegmentInfo {
                        compression: "Derived".to_string(),
                        ..base
                    },
                };
                result.push(info);
            }
        }
        result
    }
}

fn take_blocks(column: &RowGroupColumn) -> Vec<BlockId> {
    column
        .segment()
        .and_then(|segment| segment.set_data_pointer(None))
        .map(|pointer| pointer.blocks)
        .unwrap_or_default()
}
