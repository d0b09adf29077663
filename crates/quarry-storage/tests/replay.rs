//! Logging committed changes and replaying them into an empty table.

mod common;

use std::sync::Arc;

use quarry_common::error::QuarryError;
use quarry_common::types::{CommitId, DataChunk, LogicalType, RowId, Value};
use quarry_storage::{Index, NoConstraints, OrderedIndex, WalReplayer};
use quarry_txn::TransactionManager;
use quarry_wal::{LogConfig, LogReader, LogWriter};

use common::{rows, scan_rows, table};

/// Runs three logged transactions against `table`.
fn run_workload(table: &quarry_storage::DataTable, manager: &TransactionManager, log: &LogWriter) {
    let mut txn = manager.begin();
    let (row_start, count) = table
        .insert(&NoConstraints, &txn.data(), &rows(0..1200))
        .unwrap();
    manager
        .commit_with(&mut txn, |commit_id| {
            table.write_to_log(log, row_start, count)?;
            table.commit_append(commit_id, row_start, count);
            Ok::<(), QuarryError>(())
        })
        .unwrap();

    let mut txn = manager.begin();
    table
        .delete(&NoConstraints, &txn.data(), &[RowId::new(3), RowId::new(1100)])
        .unwrap();
    let renamed = DataChunk::from_rows(&[LogicalType::Varchar], &[vec![Value::from("renamed")]]).unwrap();
    table
        .update(&NoConstraints, &txn.data(), &[RowId::new(7)], &[1], &renamed)
        .unwrap();
    let id = txn.id();
    manager
        .commit_with(&mut txn, |commit_id| {
            table.write_transaction_to_log(id, log)?;
            table.commit_transaction(id, commit_id);
            Ok::<(), QuarryError>(())
        })
        .unwrap();

    // rolled back, never logged
    let txn = manager.begin();
    table
        .delete(&NoConstraints, &txn.data(), &[RowId::new(8)])
        .unwrap();
    table.rollback_transaction(txn.id());
}

#[test]
fn test_replay_reproduces_committed_state() {
    let source = table();
    let manager = TransactionManager::new();
    let log = LogWriter::in_memory(LogConfig::for_testing());
    run_workload(&source, &manager, &log);

    let reader = manager.begin();
    let expected = scan_rows(&source, &reader.data(), &[0, 1]);
    assert_eq!(expected.len(), 1198);

    let target = table();
    let index = Arc::new(OrderedIndex::new("items_id", vec![0], true));
    target.add_index(index.clone()).unwrap();
    let mut replayer = WalReplayer::new();
    replayer.register(Arc::clone(&target));
    let records = LogReader::from_bytes(log.contents().unwrap(), &LogConfig::for_testing());
    let stats = replayer.replay(records).unwrap();

    assert_eq!(stats.inserted_rows, 1200);
    assert_eq!(stats.deleted_rows, 2);
    assert_eq!(stats.updated_rows, 1);
    assert!(replayer.next_commit_id() > CommitId::new(1));

    // readers resume after the replayed commits
    let fresh = TransactionManager::starting_at(replayer.next_commit_id());
    let reader = fresh.begin();
    assert_eq!(scan_rows(&target, &reader.data(), &[0, 1]), expected);
    assert_eq!(index.len(), 1198);
    assert_eq!(index.lookup(&[Value::Integer(7)]), vec![RowId::new(7)]);
}

#[test]
fn test_replay_from_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quarry.wal");

    let source = table();
    let manager = TransactionManager::new();
    {
        let log = LogWriter::create(&path, LogConfig::for_testing()).unwrap();
        run_workload(&source, &manager, &log);
        log.sync().unwrap();
        log.close().unwrap();
    }

    let target = table();
    let mut replayer = WalReplayer::new();
    replayer.register(Arc::clone(&target));
    let records = LogReader::open(&path, &LogConfig::for_testing()).unwrap();
    replayer.replay(records).unwrap();

    let a = manager.begin();
    let fresh = TransactionManager::starting_at(replayer.next_commit_id());
    let b = fresh.begin();
    assert_eq!(
        scan_rows(&target, &b.data(), &[0, 1]),
        scan_rows(&source, &a.data(), &[0, 1])
    );
}
