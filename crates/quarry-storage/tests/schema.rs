//! Table generations created by schema changes.

mod common;

use std::sync::Arc;

use quarry_common::error::QuarryError;
use quarry_common::types::{DataChunk, LogicalType, Value};
use quarry_storage::{
    CastExpression, ConstantExpression, DataTable, FnExpression, NoConstraints, OrderedIndex,
};
use quarry_txn::TransactionManager;

use common::{insert_committed, rows, scan_rows, table};

#[test]
fn test_add_column_fills_existing_rows() {
    let parent = table();
    let manager = TransactionManager::new();
    insert_committed(&parent, &manager, &rows(0..10));

    let default = Arc::new(ConstantExpression::new(LogicalType::Integer, Value::Integer(7)).unwrap());
    let child = Arc::new(DataTable::add_column(&parent, LogicalType::Integer, default).unwrap());
    assert!(!parent.is_root());
    assert!(!child.is_root());
    child.set_as_root();
    assert_eq!(child.column_count(), 3);

    let chunk = DataChunk::from_rows(
        child.types(),
        &[vec![Value::Integer(10), Value::from("item-10"), Value::Integer(99)]],
    )
    .unwrap();
    insert_committed(&child, &manager, &chunk);

    let reader = manager.begin();
    let result = scan_rows(&child, &reader.data(), &[0, 2]);
    assert_eq!(result.len(), 11);
    assert_eq!(result[3], vec![Value::Integer(3), Value::Integer(7)]);
    assert_eq!(result[10], vec![Value::Integer(10), Value::Integer(99)]);

    // the old generation still serves reads but refuses writes
    assert_eq!(scan_rows(&parent, &reader.data(), &[0]).len(), 10);
    let txn = manager.begin();
    let err = parent
        .insert(&NoConstraints, &txn.data(), &rows(10..11))
        .unwrap_err();
    assert!(matches!(err, QuarryError::NotRoot { .. }));
}

#[test]
fn test_add_column_from_expression() {
    let parent = table();
    let manager = TransactionManager::new();
    insert_committed(&parent, &manager, &rows(0..5));

    let default = Arc::new(FnExpression::per_row(LogicalType::Varchar, |_| {
        Ok(Value::from("pending"))
    }));
    let child = DataTable::add_column(&parent, LogicalType::Varchar, default).unwrap();
    child.set_as_root();

    let reader = manager.begin();
    let result = scan_rows(&child, &reader.data(), &[2]);
    assert!(result.iter().all(|row| row[0] == Value::from("pending")));
    assert_eq!(child.get_statistics(2).unwrap().value_count(), 5);
}

#[test]
fn test_add_column_rejects_mismatched_default() {
    let parent = table();
    let default = Arc::new(ConstantExpression::null(LogicalType::Varchar));
    let err = DataTable::add_column(&parent, LogicalType::Integer, default).unwrap_err();
    assert!(matches!(err, QuarryError::TypeMismatch { .. }));
    assert!(parent.is_root());
}

#[test]
fn test_drop_column() {
    let parent = table();
    let manager = TransactionManager::new();
    insert_committed(&parent, &manager, &rows(0..1500));

    let child = DataTable::drop_column(&parent, 1).unwrap();
    child.set_as_root();
    assert_eq!(child.types(), &[LogicalType::Integer]);
    assert_eq!(child.total_rows(), 1500);

    let reader = manager.begin();
    let result = scan_rows(&child, &reader.data(), &[0]);
    assert_eq!(result[1499], vec![Value::Integer(1499)]);
}

#[test]
fn test_drop_column_index_dependencies() {
    let parent = table();
    parent
        .add_index(Arc::new(OrderedIndex::new("items_name", vec![1], false)))
        .unwrap();

    let err = DataTable::drop_column(&parent, 1).unwrap_err();
    assert!(matches!(err, QuarryError::DependencyViolation { column: 1, .. }));
    let err = DataTable::drop_column(&parent, 0).unwrap_err();
    assert!(matches!(err, QuarryError::DependencyViolation { column: 0, .. }));
    assert!(parent.is_root());
}

#[test]
fn test_alter_column_type() {
    let parent = table();
    let manager = TransactionManager::new();
    insert_committed(&parent, &manager, &rows(0..20));

    let cast = Arc::new(CastExpression::new(LogicalType::Varchar));
    let child = DataTable::alter_column_type(&parent, 0, LogicalType::Varchar, vec![0], cast).unwrap();
    child.set_as_root();
    assert_eq!(child.types()[0], LogicalType::Varchar);

    let reader = manager.begin();
    let result = scan_rows(&child, &reader.data(), &[0, 1]);
    assert_eq!(result[12], vec![Value::from("12"), Value::from("item-12")]);
}

#[test]
fn test_failed_cast_leaves_parent_untouched() {
    let parent = table();
    let manager = TransactionManager::new();
    insert_committed(&parent, &manager, &rows(0..20));

    let cast = Arc::new(CastExpression::new(LogicalType::Integer));
    let err = DataTable::alter_column_type(&parent, 1, LogicalType::Integer, vec![1], cast).unwrap_err();
    assert!(matches!(err, QuarryError::TypeMismatch { .. }));
    assert!(parent.is_root());
    insert_committed(&parent, &manager, &rows(20..30));
    assert_eq!(parent.total_rows(), 30);
}

#[test]
fn test_alter_indexed_column_is_rejected() {
    let parent = table();
    parent
        .add_index(Arc::new(OrderedIndex::new("items_id", vec![0], true)))
        .unwrap();
    let cast = Arc::new(CastExpression::new(LogicalType::BigInt));
    let err = DataTable::alter_column_type(&parent, 0, LogicalType::BigInt, vec![0], cast).unwrap_err();
    assert!(matches!(err, QuarryError::DependencyViolation { .. }));
}
