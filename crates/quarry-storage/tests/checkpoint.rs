//! Checkpointing to a block file and loading the table back.

mod common;

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use quarry_common::config::StorageConfig;
use quarry_common::error::QuarryError;
use quarry_common::types::{DataChunk, LogicalType, RowId, Value};
use quarry_storage::{
    BlockManager, DataTable, DataTableInfo, FileBlockManager, NoConstraints, PersistentTableData,
    TableDataWriter,
};
use quarry_txn::TransactionManager;

use common::{commit, insert_committed, rows, scan_rows, table};

const BLOCK_SIZE: usize = 4096;

fn load(manager: Arc<dyn BlockManager>, data: PersistentTableData) -> DataTable {
    let info = Arc::new(DataTableInfo::new("main", "items", StorageConfig::for_testing()).unwrap());
    DataTable::from_persistent(info, manager, data).unwrap()
}

#[test]
fn test_checkpoint_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("items.blocks");

    let table = table();
    let manager = TransactionManager::new();
    insert_committed(&table, &manager, &rows(0..1500));

    let mut txn = manager.begin();
    table
        .delete(&NoConstraints, &txn.data(), &[RowId::new(5), RowId::new(1100)])
        .unwrap();
    let renamed = DataChunk::from_rows(&[LogicalType::Varchar], &[vec![Value::from("renamed")]]).unwrap();
    table
        .update(&NoConstraints, &txn.data(), &[RowId::new(10)], &[1], &renamed)
        .unwrap();
    commit(&table, &manager, &mut txn);

    let reader = manager.begin();
    let expected = scan_rows(&table, &reader.data(), &[0, 1]);
    assert_eq!(expected.len(), 1498);

    let pointer = {
        let blocks = Arc::new(FileBlockManager::create(&path, BLOCK_SIZE).unwrap());
        let writer = TableDataWriter::new(blocks.clone());
        let pointer = table.checkpoint(&writer).unwrap();
        blocks.sync().unwrap();
        pointer
    };
    assert!(table.get_storage_info().iter().all(|info| info.persistent));

    let blocks: Arc<dyn BlockManager> = Arc::new(FileBlockManager::open(&path, BLOCK_SIZE).unwrap());
    let data = PersistentTableData::read(blocks.as_ref(), pointer, true).unwrap();
    assert_eq!(data.total_rows(), 1500);
    assert_eq!(data.row_groups.len(), 2);
    assert_eq!(data.row_groups[1].deleted, vec![1100 - 1024]);

    let loaded = load(blocks, data);
    assert!(loaded.is_root());
    let fresh = TransactionManager::new();
    let reader = fresh.begin();
    assert_eq!(scan_rows(&loaded, &reader.data(), &[0, 1]), expected);
    assert_eq!(loaded.info().cardinality(), 1500);

    // loaded tables take new rows after the persisted ones
    insert_committed(&loaded, &fresh, &rows(1500..1600));
    let reader = fresh.begin();
    assert_eq!(scan_rows(&loaded, &reader.data(), &[0]).len(), 1598);
}

#[test]
fn test_reloaded_table_checkpoints_again() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("items.blocks");
    let table = table();
    let manager = TransactionManager::new();
    insert_committed(&table, &manager, &rows(0..300));

    let blocks: Arc<dyn BlockManager> = Arc::new(FileBlockManager::create(&path, BLOCK_SIZE).unwrap());
    let writer = TableDataWriter::new(Arc::clone(&blocks));
    let pointer = table.checkpoint(&writer).unwrap();

    let data = PersistentTableData::read(blocks.as_ref(), pointer, true).unwrap();
    let loaded = load(Arc::clone(&blocks), data);
    let used = blocks.used_blocks();

    // nothing changed, so the rewrite needs as many blocks as before
    let pointer = loaded.checkpoint(&writer).unwrap();
    assert_eq!(blocks.used_blocks(), used);
    let data = PersistentTableData::read(blocks.as_ref(), pointer, true).unwrap();
    assert_eq!(data.total_rows(), 300);
}

#[test]
fn test_corrupted_block_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("items.blocks");
    let table = table();
    let manager = TransactionManager::new();
    insert_committed(&table, &manager, &rows(0..100));

    let blocks = Arc::new(FileBlockManager::create(&path, BLOCK_SIZE).unwrap());
    let pointer = table.checkpoint(&TableDataWriter::new(blocks.clone())).unwrap();
    blocks.sync().unwrap();
    drop(blocks);

    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    let offset = pointer.block_id.as_u64() * BLOCK_SIZE as u64 + 20;
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&[0xAB, 0xCD]).unwrap();
    file.sync_all().unwrap();

    let blocks = FileBlockManager::open(&path, BLOCK_SIZE).unwrap();
    let err = PersistentTableData::read(&blocks, pointer, true).unwrap_err();
    assert!(matches!(err, QuarryError::ChecksumMismatch { .. }));
}

#[test]
fn test_load_under_other_name_is_rejected() {
    let table = table();
    let manager = TransactionManager::new();
    insert_committed(&table, &manager, &rows(0..10));

    let blocks: Arc<dyn BlockManager> =
        Arc::new(quarry_storage::InMemoryBlockManager::new(BLOCK_SIZE).unwrap());
    let pointer = table.checkpoint(&TableDataWriter::new(Arc::clone(&blocks))).unwrap();
    let data = PersistentTableData::read(blocks.as_ref(), pointer, true).unwrap();

    let info = Arc::new(DataTableInfo::new("main", "other", StorageConfig::for_testing()).unwrap());
    let err = DataTable::from_persistent(info, blocks, data).unwrap_err();
    assert!(matches!(err, QuarryError::InvalidArgument { .. }));
}
