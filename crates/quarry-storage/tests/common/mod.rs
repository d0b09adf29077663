//! Shared helpers for the table integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use quarry_common::config::StorageConfig;
use quarry_common::error::QuarryError;
use quarry_common::types::{CommitId, DataChunk, LogicalType, TransactionData, Value};
use quarry_storage::{DataTable, DataTableInfo, NoConstraints};
use quarry_txn::{Transaction, TransactionManager};

/// Installs a test subscriber once; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Column types of the test table: `(id INTEGER, name VARCHAR)`.
pub fn types() -> Vec<LogicalType> {
    vec![LogicalType::Integer, LogicalType::Varchar]
}

/// Creates an empty `main.items` table with the testing configuration.
pub fn table() -> Arc<DataTable> {
    table_with(StorageConfig::for_testing())
}

/// Creates an empty `main.items` table with `config`.
pub fn table_with(config: StorageConfig) -> Arc<DataTable> {
    init_tracing();
    let info = Arc::new(DataTableInfo::new("main", "items", config).unwrap());
    Arc::new(DataTable::new(info, types()).unwrap())
}

/// Rows `(i, "item-i")` for `i` in `range`.
pub fn rows(range: std::ops::Range<i32>) -> DataChunk {
    let rows: Vec<Vec<Value>> = range
        .map(|i| vec![Value::Integer(i), Value::from(format!("item-{}", i))])
        .collect();
    DataChunk::from_rows(&types(), &rows).unwrap()
}

/// Inserts `chunk` in its own transaction and commits it.
pub fn insert_committed(table: &DataTable, manager: &TransactionManager, chunk: &DataChunk) -> CommitId {
    let mut txn = manager.begin();
    let (row_start, count) = table.insert(&NoConstraints, &txn.data(), chunk).unwrap();
    manager
        .commit_with(&mut txn, |commit_id| {
            table.commit_append(commit_id, row_start, count);
            Ok::<(), QuarryError>(())
        })
        .unwrap()
}

/// Commits the deletes and updates of `txn`.
pub fn commit(table: &DataTable, manager: &TransactionManager, txn: &mut Transaction) -> CommitId {
    let id = txn.id();
    manager
        .commit_with(txn, |commit_id| {
            table.commit_transaction(id, commit_id);
            Ok::<(), QuarryError>(())
        })
        .unwrap()
}

/// Scans `column_ids` as `txn` sees them.
pub fn scan_rows(table: &DataTable, txn: &TransactionData, column_ids: &[usize]) -> Vec<Vec<Value>> {
    let mut state = table.initialize_scan(column_ids.to_vec(), None).unwrap();
    let mut chunk = DataChunk::new(&[]);
    let mut result = Vec::new();
    loop {
        table.scan(txn, &mut chunk, &mut state).unwrap();
        if chunk.is_empty() {
            return result;
        }
        result.extend(chunk.rows());
    }
}

/// Scans the integer ids of every row `txn` can see.
pub fn scan_ids(table: &DataTable, txn: &TransactionData) -> Vec<i64> {
    scan_rows(table, txn, &[0])
        .into_iter()
        .map(|row| row[0].as_i64().unwrap())
        .collect()
}
