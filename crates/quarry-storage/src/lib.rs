//! # quarry-storage
//!
//! Row-group table storage for Quarry.
//!
//! A [`DataTable`] stores one table as a sequence of [`RowGroup`]s, each
//! covering a fixed range of row ids and holding one [`ColumnSegment`] per
//! column plus per-row version information for MVCC. On top of that layout
//! the crate provides:
//!
//! - **Appends**: serialized, revertible bulk appends committed by stamping a
//!   commit id on the appended rows
//! - **Scans**: sequential and parallel scans with zone-map pruning and
//!   pushed-down filters, zero-copy where possible
//! - **Fetches, deletes and updates** by row id, with write-write conflict
//!   detection and per-transaction undo
//! - **Indexes** kept consistent with every row mutation
//! - **Checkpoints** of the committed data into chains of blocks, and loading
//!   them back
//! - **Schema changes** as new table generations layered on their parent
//! - **WAL replay** of logged changes
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use quarry_common::config::StorageConfig;
//! use quarry_common::error::QuarryResult;
//! use quarry_common::types::{CommitId, DataChunk, LogicalType, TransactionData, TransactionId, Value};
//! use quarry_storage::{DataTable, DataTableInfo, NoConstraints};
//!
//! fn example() -> QuarryResult<()> {
//!     let info = Arc::new(DataTableInfo::new("main", "items", StorageConfig::default())?);
//!     let table = DataTable::new(info, vec![LogicalType::Integer])?;
//!     let txn = TransactionData::new(CommitId::new(1), TransactionId::FIRST);
//!
//!     let chunk = DataChunk::from_rows(&[LogicalType::Integer], &[vec![Value::Integer(42)]])?;
//!     let (row_start, count) = table.insert(&NoConstraints, &txn, &chunk)?;
//!     table.commit_append(CommitId::new(1), row_start, count);
//!     assert_eq!(table.info().cardinality(), 1);
//!     Ok(())
//! }
//! # example().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block;
pub mod checkpoint;
pub mod constraints;
pub mod expression;
pub mod filter;
pub mod index;
pub mod info;
pub mod replay;
pub mod row_group;
pub mod segment;
pub mod segment_tree;
pub mod state;
pub mod statistics;
pub mod table;
pub mod version;

pub use block::{BlockManager, FileBlockManager, InMemoryBlockManager};
pub use checkpoint::{BlockPointer, PersistentTableData, TableDataWriter};
pub use constraints::{BoundConstraints, CheckConstraint, NoConstraints, TableConstraints};
pub use expression::{CastExpression, ConstantExpression, Expression, FnExpression};
pub use filter::{CompareOp, FilterPropagateResult, TableFilter, TableFilterSet};
pub use index::{Index, IndexId, OrderedIndex, TableIndexList};
pub use info::DataTableInfo;
pub use replay::{ReplayStats, WalReplayer};
pub use row_group::RowGroup;
pub use segment::{ColumnSegment, CompressionType, DataPointer};
pub use state::{
    ColumnFetchState, CreateIndexScanState, ParallelTableScanState, TableAppendState,
    TableScanState, TableScanType,
};
pub use statistics::ColumnStatistics;
pub use table::{ColumnSegmentInfo, DataTable};
