//! Table storage benchmarks for Quarry.
//!
//! Benchmarks for:
//! - Bulk appends
//! - Full sequential scans
//! - Filtered scans with zone-map pruning
//! - Random fetches by row id

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use quarry_common::config::StorageConfig;
use quarry_common::types::{CommitId, DataChunk, LogicalType, RowId, TransactionData, TransactionId, Value};
use quarry_storage::{
    ColumnFetchState, CompareOp, DataTable, DataTableInfo, NoConstraints, TableFilter,
    TableFilterSet,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn types() -> Vec<LogicalType> {
    vec![LogicalType::BigInt, LogicalType::Double, LogicalType::Varchar]
}

/// Generate rows with sequential ids and random payloads.
fn generate_chunks(count: usize, chunk_size: usize) -> Vec<DataChunk> {
    let mut rng = StdRng::seed_from_u64(42);
    let rows: Vec<Vec<Value>> = (0..count)
        .map(|i| {
            vec![
                Value::BigInt(i as i64),
                Value::Double(rng.gen_range(0.0..1000.0)),
                Value::from(format!("row_{:08}", rng.gen::<u32>())),
            ]
        })
        .collect();
    rows.chunks(chunk_size)
        .map(|rows| DataChunk::from_rows(&types(), rows).unwrap())
        .collect()
}

fn empty_table() -> DataTable {
    let info = Arc::new(DataTableInfo::new("bench", "rows", StorageConfig::default()).unwrap());
    DataTable::new(info, types()).unwrap()
}

/// Build a committed table of `count` rows.
fn build_table(count: usize) -> DataTable {
    let table = empty_table();
    let txn = TransactionData::new(CommitId::new(1), TransactionId::FIRST);
    for chunk in generate_chunks(count, 2048) {
        let (row_start, appended) = table.insert(&NoConstraints, &txn, &chunk).unwrap();
        table.commit_append(CommitId::new(1), row_start, appended);
    }
    table
}

fn reader() -> TransactionData {
    TransactionData::new(CommitId::new(2), TransactionId::FIRST.next())
}

/// Benchmark bulk appends.
fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("table/append");

    for size in [10_000, 100_000].iter() {
        let chunks = generate_chunks(*size, 2048);
        let txn = TransactionData::new(CommitId::new(1), TransactionId::FIRST);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let table = empty_table();
                for chunk in &chunks {
                    let (row_start, count) = table.insert(&NoConstraints, &txn, chunk).unwrap();
                    table.commit_append(CommitId::new(1), row_start, count);
                }
                black_box(table.total_rows())
            });
        });
    }

    group.finish();
}

/// Benchmark full scans of every column.
fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("table/scan");
    let txn = reader();

    for size in [10_000, 100_000, 500_000].iter() {
        let table = build_table(*size);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut state = table.initialize_scan(vec![0, 1, 2], None).unwrap();
                let mut chunk = DataChunk::new(&[]);
                let mut rows = 0;
                loop {
                    table.scan(&txn, &mut chunk, &mut state).unwrap();
                    if chunk.is_empty() {
                        break;
                    }
                    rows += chunk.size();
                }
                black_box(rows)
            });
        });
    }

    group.finish();
}

/// Benchmark selective scans that skip most row groups.
fn bench_filtered_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("table/filtered_scan");
    let txn = reader();
    let size = 500_000;
    let table = build_table(size);

    for selectivity in [0.01, 0.1, 0.5].iter() {
        let threshold = (size as f64 * (1.0 - selectivity)) as i64;

        group.bench_with_input(
            BenchmarkId::from_parameter(selectivity),
            selectivity,
            |b, _| {
                b.iter(|| {
                    let filters = TableFilterSet::new()
                        .with_filter(0, TableFilter::compare(CompareOp::GreaterThanOrEqual, threshold));
                    let mut state = table.initialize_scan(vec![0], Some(filters)).unwrap();
                    let mut chunk = DataChunk::new(&[]);
                    let mut rows = 0;
                    loop {
                        table.scan(&txn, &mut chunk, &mut state).unwrap();
                        if chunk.is_empty() {
                            break;
                        }
                        rows += chunk.size();
                    }
                    black_box(rows)
                });
            },
        );
    }

    group.finish();
}

/// Benchmark random fetches by row id.
fn bench_fetch(c: &mut Criterion) {
    let mut group = c.benchmark_group("table/fetch");
    let txn = reader();
    let size = 100_000;
    let table = build_table(size);

    for batch in [16, 256, 2048].iter() {
        let mut rng = StdRng::seed_from_u64(42);
        let row_ids: Vec<RowId> = (0..*batch)
            .map(|_| RowId::new(rng.gen_range(0..size as u64)))
            .collect();

        group.throughput(Throughput::Elements(*batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), batch, |b, _| {
            b.iter(|| {
                let mut state = ColumnFetchState::new();
                let mut result = DataChunk::new(&[]);
                table
                    .fetch(&txn, &mut result, &[0, 2], &row_ids, &mut state)
                    .unwrap();
                black_box(result.size())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_append,
    bench_scan,
    bench_filtered_scan,
    bench_fetch
);
criterion_main!(benches);
