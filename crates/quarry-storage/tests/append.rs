//! Append, commit and revert.

mod common;

use std::io;
use std::sync::Arc;

use quarry_common::error::QuarryError;
use quarry_common::types::{CommitId, DataChunk, RowId, TransactionData, Value, Vector};
use quarry_storage::{BoundConstraints, Index, NoConstraints, OrderedIndex};
use quarry_txn::TransactionManager;
use quarry_wal::{LogConfig, LogWriter, WalError, WalResult, WriteAheadLog};

use common::{insert_committed, rows, scan_ids, table};

/// A log whose inserts always fail.
struct FailingLog;

impl WriteAheadLog for FailingLog {
    fn write_set_table(&self, _schema: &str, _table: &str) -> WalResult<()> {
        Ok(())
    }

    fn write_insert(&self, _chunk: &DataChunk) -> WalResult<()> {
        Err(WalError::Io {
            source: io::Error::new(io::ErrorKind::Other, "disk full"),
        })
    }

    fn write_delete(&self, _row_ids: &[RowId]) -> WalResult<()> {
        Ok(())
    }

    fn write_update(&self, _path: &[usize], _row_ids: &[RowId], _values: &Vector) -> WalResult<()> {
        Ok(())
    }

    fn flush(&self) -> WalResult<()> {
        Ok(())
    }
}

#[test]
fn test_revert_second_chunk_then_commit_first() {
    let table = table();
    let manager = TransactionManager::new();
    let mut txn = manager.begin();

    let mut state = table.initialize_append(&txn.data(), 1000).unwrap();
    table.append(&rows(0..500), &mut state).unwrap();
    table.append(&rows(500..1000), &mut state).unwrap();
    let (row_start, count) = state.finish();
    assert_eq!((row_start, count), (0, 1000));
    assert_eq!(table.total_rows(), 1000);

    table.revert_append(500, 500).unwrap();
    assert_eq!(table.total_rows(), 500);

    let commit_id = manager
        .commit_with(&mut txn, |commit_id| {
            table.commit_append(commit_id, 0, 500);
            Ok::<(), QuarryError>(())
        })
        .unwrap();
    assert_eq!(commit_id, CommitId::new(1));

    let reader = manager.begin();
    assert_eq!(scan_ids(&table, &reader.data()), (0..500).collect::<Vec<i64>>());
    assert_eq!(table.info().cardinality(), 500);

    // the reverted ids are handed out again
    insert_committed(&table, &manager, &rows(500..600));
    assert_eq!(table.total_rows(), 600);
}

#[test]
fn test_failed_log_write_reverts_append() {
    let table = table();
    let manager = TransactionManager::new();
    insert_committed(&table, &manager, &rows(0..100));
    let groups_before = table.row_group_count();

    let txn = manager.begin();
    let (row_start, count) = table
        .insert(&NoConstraints, &txn.data(), &rows(100..2100))
        .unwrap();
    assert!(table.row_group_count() > groups_before);

    let err = table.write_to_log(&FailingLog, row_start, count).unwrap_err();
    assert!(matches!(err, QuarryError::Io { .. }));

    table.revert_append(row_start, count).unwrap();
    assert_eq!(table.total_rows(), 100);
    assert_eq!(table.row_group_count(), groups_before);

    // reverting twice is harmless
    table.revert_append(row_start, count).unwrap();
    assert_eq!(table.total_rows(), 100);

    let reader = manager.begin();
    assert_eq!(scan_ids(&table, &reader.data()).len(), 100);
}

#[test]
fn test_revert_hides_rows_appended_before_later_inserts() {
    let table = table();
    let manager = TransactionManager::new();
    let index = Arc::new(OrderedIndex::new("items_id", vec![0], true));
    table.add_index(index.clone()).unwrap();

    let mut a = manager.begin();
    let (first, count) = table.insert(&NoConstraints, &a.data(), &rows(0..10)).unwrap();
    insert_committed(&table, &manager, &rows(10..20));

    // a's log write fails after another insert landed behind its rows
    let err = manager
        .commit_with(&mut a, |_| table.write_to_log(&FailingLog, first, count))
        .unwrap_err();
    assert!(matches!(err, QuarryError::Io { .. }));
    table.revert_append(first, count).unwrap();
    manager.abort(&mut a).unwrap();

    assert_eq!(table.total_rows(), 20);
    assert_eq!(index.len(), 10);
    assert!(index.lookup(&[Value::Integer(5)]).is_empty());
    assert_eq!(table.commit_append(CommitId::new(99), first, count), 0);

    // reverting again changes nothing
    table.revert_append(first, count).unwrap();
    assert_eq!(index.len(), 10);

    // the aborted key is free again and new rows go after the hidden ones
    insert_committed(&table, &manager, &rows(5..6));
    assert_eq!(index.lookup(&[Value::Integer(5)]), vec![RowId::new(20)]);
    let reader = manager.begin();
    let mut ids = scan_ids(&table, &reader.data());
    ids.sort_unstable();
    let mut expected: Vec<i64> = (10..20).collect();
    expected.insert(0, 5);
    assert_eq!(ids, expected);
    assert_eq!(table.info().cardinality(), 11);

    // a committed row cannot be reverted
    let err = table.revert_append(10, 5).unwrap_err();
    assert!(matches!(err, QuarryError::Internal { .. }));
    assert_eq!(scan_ids(&table, &manager.begin().data()).len(), 11);
}

#[test]
fn test_commit_after_partial_revert_counts_surviving_rows() {
    let table = table();
    let manager = TransactionManager::new();
    let mut txn = manager.begin();

    let mut state = table.initialize_append(&txn.data(), 1000).unwrap();
    table.append(&rows(0..1000), &mut state).unwrap();
    let (row_start, count) = state.finish();
    table.revert_append(500, 500).unwrap();

    let mut committed = 0;
    manager
        .commit_with(&mut txn, |commit_id| {
            committed = table.commit_append(commit_id, row_start, count);
            Ok::<(), QuarryError>(())
        })
        .unwrap();
    assert_eq!(committed, 500);
    assert_eq!(table.total_rows(), 500);
    assert_eq!(table.info().cardinality(), 500);
    assert!(table.info().cardinality() <= table.total_rows());
}

#[test]
fn test_uncommitted_rows_only_visible_to_owner() {
    let table = table();
    let manager = TransactionManager::new();
    let writer = manager.begin();
    let reader = manager.begin();

    table.insert(&NoConstraints, &writer.data(), &rows(0..10)).unwrap();
    assert_eq!(scan_ids(&table, &writer.data()).len(), 10);
    assert!(scan_ids(&table, &reader.data()).is_empty());
}

#[test]
fn test_append_spans_row_groups() {
    let table = table();
    let manager = TransactionManager::new();
    insert_committed(&table, &manager, &rows(0..2500));

    assert_eq!(table.row_group_count(), 3);
    let reader = manager.begin();
    assert_eq!(scan_ids(&table, &reader.data()), (0..2500).collect::<Vec<i64>>());
}

#[test]
fn test_dropped_append_state_reverts() {
    let table = table();
    let txn = TransactionData::new(CommitId::new(1), quarry_common::types::TransactionId::FIRST);
    {
        let mut state = table.initialize_append(&txn, 10).unwrap();
        table.append(&rows(0..10), &mut state).unwrap();
    }
    assert_eq!(table.total_rows(), 0);
}

#[test]
fn test_unique_violation_reverts_insert() {
    let table = table();
    let manager = TransactionManager::new();
    let index = Arc::new(OrderedIndex::new("items_id", vec![0], true));
    table.add_index(index.clone()).unwrap();
    insert_committed(&table, &manager, &rows(0..10));

    let mut chunk = rows(10..20);
    chunk
        .append_row(vec![Value::Integer(5), Value::from("duplicate")])
        .unwrap();
    let txn = manager.begin();
    let err = table.insert(&NoConstraints, &txn.data(), &chunk).unwrap_err();
    assert!(matches!(err, QuarryError::UniqueViolation { .. }));
    assert!(err.is_constraint_violation());
    assert_eq!(table.total_rows(), 10);
    assert_eq!(index.len(), 10);

    insert_committed(&table, &manager, &rows(10..20));
    assert_eq!(index.len(), 20);
    assert_eq!(index.lookup(&[Value::Integer(15)]), vec![RowId::new(15)]);
}

#[test]
fn test_not_null_violation_appends_nothing() {
    let table = table();
    let manager = TransactionManager::new();
    let constraints = BoundConstraints::new().with_not_null(1);
    let chunk = DataChunk::from_rows(
        table.types(),
        &[vec![Value::Integer(1), Value::Null]],
    )
    .unwrap();

    let txn = manager.begin();
    let err = table.insert(&constraints, &txn.data(), &chunk).unwrap_err();
    assert!(err.is_constraint_violation());
    assert_eq!(table.total_rows(), 0);
    assert_eq!(table.row_group_count(), 0);
}

#[test]
fn test_concurrent_inserts() {
    let table = table();
    let manager = TransactionManager::new();
    std::thread::scope(|scope| {
        for worker in 0..4 {
            let table = &table;
            let manager = &manager;
            scope.spawn(move || {
                let start = worker * 300;
                insert_committed(table, manager, &rows(start..start + 300));
            });
        }
    });

    assert_eq!(table.total_rows(), 1200);
    assert_eq!(table.info().cardinality(), 1200);
    let reader = manager.begin();
    let mut ids = scan_ids(&table, &reader.data());
    ids.sort_unstable();
    assert_eq!(ids, (0..1200).collect::<Vec<i64>>());
}

#[test]
fn test_write_to_log_records_inserts() {
    let table = table();
    let manager = TransactionManager::new();
    let txn = manager.begin();
    let (row_start, count) = table
        .insert(&NoConstraints, &txn.data(), &rows(0..600))
        .unwrap();

    let log = LogWriter::in_memory(LogConfig::for_testing());
    table.write_to_log(&log, row_start, count).unwrap();
    let inserted: usize = quarry_wal::LogReader::from_bytes(log.contents().unwrap(), &LogConfig::for_testing())
        .map(|record| match record.unwrap().payload {
            quarry_wal::LogPayload::Insert(insert) => insert.chunk.size(),
            _ => 0,
        })
        .sum();
    assert_eq!(inserted, 600);
}
