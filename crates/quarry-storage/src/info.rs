//! Table identity shared across generations.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use quarry_common::config::StorageConfig;
use quarry_common::constants::TEMP_SCHEMA;
use quarry_common::error::QuarryResult;
use quarry_common::types::BlockId;

use crate::block::BlockManager;
use crate::index::TableIndexList;
use crate::table::undo::UndoBuffer;

/// Identity of a logical table.
///
/// Every generation of a table (see [`crate::DataTable::add_column`]) holds
/// the same `Arc<DataTableInfo>`. The cardinality counts committed rows only.
pub struct DataTableInfo {
    schema: String,
    table: String,
    config: StorageConfig,
    cardinality: AtomicU64,
    indexes: TableIndexList,
    block_manager: RwLock<Option<Arc<dyn BlockManager>>>,
    table_blocks: Mutex<Vec<BlockId>>,
    undo: UndoBuffer,
}

impl DataTableInfo {
    /// Creates the identity of table `schema.table`.
    pub fn new(
        schema: impl Into<String>,
        table: impl Into<String>,
        config: StorageConfig,
    ) -> QuarryResult<Self> {
        config.validate()?;
        Ok(Self {
            schema: schema.into(),
            table: table.into(),
            config,
            cardinality: AtomicU64::new(0),
            indexes: TableIndexList::new(),
            block_manager: RwLock::new(None),
            table_blocks: Mutex::new(Vec::new()),
            undo: UndoBuffer::default(),
        })
    }

    /// Returns the schema name.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Returns the table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns `schema.table`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    /// Returns the storage configuration.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Returns true for tables in the temporary schema, which are never logged.
    pub fn is_temporary(&self) -> bool {
        self.schema == TEMP_SCHEMA
    }

    /// Returns the number of committed rows.
    pub fn cardinality(&self) -> u64 {
        self.cardinality.load(Ordering::Acquire)
    }

    pub(crate) fn add_cardinality(&self, rows: u64) {
        self.cardinality.fetch_add(rows, Ordering::AcqRel);
    }

    pub(crate) fn set_cardinality(&self, rows: u64) {
        self.cardinality.store(rows, Ordering::Release);
    }

    /// Returns the attached indexes.
    pub fn indexes(&self) -> &TableIndexList {
        &self.indexes
    }

    /// Returns the block manager holding the table's persisted data.
    pub fn block_manager(&self) -> Option<Arc<dyn BlockManager>> {
        self.block_manager.read().clone()
    }

    pub(crate) fn set_block_manager(&self, manager: Arc<dyn BlockManager>) {
        *self.block_manager.write() = Some(manager);
    }

    /// Returns the blocks of the persisted table root chain.
    pub fn table_blocks(&self) -> Vec<BlockId> {
        self.table_blocks.lock().clone()
    }

    pub(crate) fn replace_table_blocks(&self, blocks: Vec<BlockId>) -> Vec<BlockId> {
        std::mem::replace(&mut *self.table_blocks.lock(), blocks)
    }

    /// Deletes and updates of in-flight transactions, shared by every
    /// generation of the table.
    pub(crate) fn undo(&self) -> &UndoBuffer {
        &self.undo
    }
}

impl fmt::Debug for DataTableInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTableInfo")
            .field("schema", &self.schema)
            .field("table", &self.table)
            .field("cardinality", &self.cardinality())
            .field("indexes", &self.indexes)
            .field("pending_transactions", &self.undo.pending_transactions())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info() {
        let info = DataTableInfo::new("main", "t", StorageConfig::for_testing()).unwrap();
        assert_eq!(info.qualified_name(), "main.t");
        assert!(!info.is_temporary());
        info.add_cardinality(5);
        assert_eq!(info.cardinality(), 5);
        assert!(info.block_manager().is_none());

        let temp = DataTableInfo::new(TEMP_SCHEMA, "t", StorageConfig::default()).unwrap();
        assert!(temp.is_temporary());

        let bad = StorageConfig::default().with_vector_size(3);
        assert!(DataTableInfo::new("main", "t", bad).is_err());
    }
}
