//! Sequential scans, parallel scans and fetches.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use quarry_common::config::StorageConfig;
use quarry_common::constants::COLUMN_IDENTIFIER_ROW_ID;
use quarry_common::error::QuarryError;
use quarry_common::types::{DataChunk, RowId, Value};
use quarry_storage::{
    ColumnFetchState, CompareOp, Index, NoConstraints, OrderedIndex, TableFilter, TableFilterSet,
    TableScanType,
};
use quarry_txn::TransactionManager;

use common::{commit, insert_committed, rows, scan_rows, table, table_with};

#[test]
fn test_parallel_scan_sees_every_row_once() {
    let table = table();
    let manager = TransactionManager::new();
    insert_committed(&table, &manager, &rows(0..1500));
    assert_eq!(table.row_group_count(), 2);

    let reader = manager.begin();
    let parallel = table.initialize_parallel_scan(vec![0], None).unwrap();
    assert_eq!(parallel.unit_count(), 2);

    let seen = Mutex::new(Vec::new());
    std::thread::scope(|scope| {
        for _ in 0..2 {
            scope.spawn(|| {
                let mut state = table.initialize_local_scan(&parallel);
                let mut chunk = DataChunk::new(&[]);
                let mut local = Vec::new();
                while table.next_parallel_scan(&parallel, &mut state) {
                    loop {
                        table.scan(&reader.data(), &mut chunk, &mut state).unwrap();
                        if chunk.is_empty() {
                            break;
                        }
                        local.extend(chunk.column(0).iter().map(|v| v.as_i64().unwrap()));
                    }
                }
                seen.lock().extend(local);
            });
        }
    });

    let mut seen = seen.into_inner();
    seen.sort_unstable();
    assert_eq!(seen, (0..1500).collect::<Vec<i64>>());
    assert_eq!(parallel.remaining(), 0);
}

#[test]
fn test_parallel_scan_with_small_units() {
    let table = table_with(StorageConfig::for_testing().with_parallel_scan_vector_count(1));
    let manager = TransactionManager::new();
    insert_committed(&table, &manager, &rows(0..1500));

    let parallel = table.initialize_parallel_scan(vec![0], None).unwrap();
    // four vectors per full row group, plus the tail group's full capacity
    assert_eq!(parallel.unit_count(), 8);

    let reader = manager.begin();
    let mut state = table.initialize_local_scan(&parallel);
    let mut chunk = DataChunk::new(&[]);
    let mut ids = HashSet::new();
    while table.next_parallel_scan(&parallel, &mut state) {
        loop {
            table.scan(&reader.data(), &mut chunk, &mut state).unwrap();
            if chunk.is_empty() {
                break;
            }
            for value in chunk.column(0).iter() {
                assert!(ids.insert(value.as_i64().unwrap()));
            }
        }
    }
    assert_eq!(ids.len(), 1500);
}

#[test]
fn test_zonemap_skips_row_groups() {
    let table = table();
    let manager = TransactionManager::new();
    insert_committed(&table, &manager, &rows(0..2048));

    let filters = TableFilterSet::new().with_filter(0, TableFilter::compare(CompareOp::GreaterThan, 1500));
    let mut state = table.initialize_scan(vec![0], Some(filters)).unwrap();
    let reader = manager.begin();
    let mut chunk = DataChunk::new(&[]);
    let mut ids = Vec::new();
    loop {
        assert!(table.scan(&reader.data(), &mut chunk, &mut state).unwrap());
        if chunk.is_empty() {
            break;
        }
        ids.extend(chunk.column(0).iter().map(|v| v.as_i64().unwrap()));
    }
    assert_eq!(ids, (1501..2048).collect::<Vec<i64>>());
    assert_eq!(state.row_groups_skipped(), 1);
    assert_eq!(state.rows_scanned(), 547);
}

#[test]
fn test_undecidable_filter_keeps_rows() {
    let table = table();
    let manager = TransactionManager::new();
    insert_committed(&table, &manager, &rows(0..10));

    let filters = TableFilterSet::new().with_filter(0, TableFilter::compare(CompareOp::Equal, "seven"));
    let mut state = table.initialize_scan(vec![0], Some(filters)).unwrap();
    let reader = manager.begin();
    let mut chunk = DataChunk::new(&[]);
    let applied = table.scan(&reader.data(), &mut chunk, &mut state).unwrap();
    assert!(!applied);
    assert_eq!(chunk.size(), 10);
}

#[test]
fn test_row_id_column() {
    let table = table();
    let manager = TransactionManager::new();
    insert_committed(&table, &manager, &rows(100..110));

    let reader = manager.begin();
    let result = scan_rows(&table, &reader.data(), &[COLUMN_IDENTIFIER_ROW_ID, 0]);
    assert_eq!(result[3], vec![Value::BigInt(3), Value::Integer(103)]);
}

#[test]
fn test_scan_bound_to_other_transaction_fails() {
    let table = table();
    let manager = TransactionManager::new();
    let a = manager.begin();
    let b = manager.begin();
    let mut state = table.initialize_scan_with(&a.data(), vec![0], None).unwrap();
    let mut chunk = DataChunk::new(&[]);
    let err = table.scan(&b.data(), &mut chunk, &mut state).unwrap_err();
    assert!(matches!(err, QuarryError::InvalidArgument { .. }));
    assert!(table.scan(&a.data(), &mut chunk, &mut state).is_ok());
}

#[test]
fn test_scan_table_segment_produces_exact_range() {
    let table = table();
    let manager = TransactionManager::new();
    insert_committed(&table, &manager, &rows(0..1500));

    let mut seen = Vec::new();
    table
        .scan_table_segment(1000, 300, |chunk, first_row| {
            assert!(chunk.size() <= 256);
            assert_eq!(chunk.column(0).get(0).and_then(Value::as_i64), Some(first_row as i64));
            seen.extend(chunk.column(0).iter().map(|v| v.as_i64().unwrap()));
            Ok(())
        })
        .unwrap();
    assert_eq!(seen, (1000..1300).collect::<Vec<i64>>());
}

#[test]
fn test_fetch_skips_invisible_rows() {
    let table = table();
    let manager = TransactionManager::new();
    insert_committed(&table, &manager, &rows(0..1500));

    let mut deleter = manager.begin();
    table
        .delete(&NoConstraints, &deleter.data(), &[RowId::new(7)])
        .unwrap();
    commit(&table, &manager, &mut deleter);

    let reader = manager.begin();
    let mut state = ColumnFetchState::new();
    let mut result = DataChunk::new(&[]);
    table
        .fetch(
            &reader.data(),
            &mut result,
            &[1],
            &[RowId::new(5), RowId::new(1200), RowId::new(7)],
            &mut state,
        )
        .unwrap();
    assert_eq!(result.size(), 2);
    assert_eq!(result.row(1), vec![Value::from("item-1200")]);
    assert_eq!(state.rows_fetched(), 2);

    let err = table
        .fetch(&reader.data(), &mut result, &[0], &[RowId::new(5000)], &mut state)
        .unwrap_err();
    assert!(matches!(err, QuarryError::RowOutOfRange { .. }));
}

#[test]
fn test_scan_during_append_sees_committed_prefix() {
    let table = table();
    let manager = TransactionManager::new();
    insert_committed(&table, &manager, &rows(0..100));

    let reader = manager.begin();
    let mut state = table.initialize_scan(vec![0], None).unwrap();
    let writer = manager.begin();
    table.insert(&NoConstraints, &writer.data(), &rows(100..200)).unwrap();

    let mut chunk = DataChunk::new(&[]);
    let mut count = 0;
    loop {
        table.scan(&reader.data(), &mut chunk, &mut state).unwrap();
        if chunk.is_empty() {
            break;
        }
        count += chunk.size();
    }
    assert_eq!(count, 100);
}

#[test]
fn test_create_index_scan_views() {
    let table = table();
    let manager = TransactionManager::new();
    insert_committed(&table, &manager, &rows(0..10));
    let writer = manager.begin();
    table.insert(&NoConstraints, &writer.data(), &rows(10..15)).unwrap();

    for (scan_type, expected) in [(TableScanType::CommittedRows, 10), (TableScanType::LatestRows, 15)] {
        let mut state = table.initialize_create_index_scan(scan_type, vec![0]).unwrap();
        assert_eq!(state.scan_type(), scan_type);
        let mut chunk = DataChunk::new(&[]);
        let mut count = 0;
        loop {
            table.create_index_scan(&mut state, &mut chunk).unwrap();
            if chunk.is_empty() {
                break;
            }
            count += chunk.size();
        }
        assert_eq!(count, expected);
    }
}

#[test]
fn test_add_index_over_existing_rows() {
    let table = table();
    let manager = TransactionManager::new();
    insert_committed(&table, &manager, &rows(0..20));
    let mut deleter = manager.begin();
    table
        .delete(&NoConstraints, &deleter.data(), &[RowId::new(4)])
        .unwrap();
    commit(&table, &manager, &mut deleter);
    let writer = manager.begin();
    let (row_start, count) = table
        .insert(&NoConstraints, &writer.data(), &rows(20..25))
        .unwrap();

    let pending = manager.begin();
    table
        .delete(&NoConstraints, &pending.data(), &[RowId::new(7)])
        .unwrap();
    let index = Arc::new(OrderedIndex::new("items_id", vec![0], true));
    let err = table.add_index(index.clone()).unwrap_err();
    assert!(matches!(err, QuarryError::NotSupported { .. }));
    assert!(index.is_empty());
    table.rollback_transaction(pending.id());

    table.add_index(index.clone()).unwrap();
    assert_eq!(index.len(), 24);
    assert!(index.lookup(&[Value::Integer(4)]).is_empty());
    assert_eq!(index.lookup(&[Value::Integer(7)]), vec![RowId::new(7)]);
    assert_eq!(index.lookup(&[Value::Integer(22)]), vec![RowId::new(22)]);

    table.revert_append(row_start, count).unwrap();
    assert_eq!(index.len(), 19);
}
