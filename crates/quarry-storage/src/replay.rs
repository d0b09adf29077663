//! Write-ahead-log replay.
//!
//! Every data record is applied and committed under its own replay
//! transaction, in log order. Constraints are not checked again; indexes are
//! maintained.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{CommitId, TransactionData, TransactionId};
use quarry_wal::{LogPayload, LogRecord, WalResult};
use tracing::{debug, info};

use crate::constraints::NoConstraints;
use crate::table::DataTable;

/// Counters of a replay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records applied.
    pub records: u64,
    /// Rows appended.
    pub inserted_rows: u64,
    /// Rows deleted.
    pub deleted_rows: u64,
    /// Rows updated.
    pub updated_rows: u64,
}

/// Applies log records to a set of tables.
pub struct WalReplayer {
    tables: HashMap<(String, String), Arc<DataTable>>,
    current: Option<Arc<DataTable>>,
    next_commit: CommitId,
    next_txn: TransactionId,
    stats: ReplayStats,
}

impl Default for WalReplayer {
    fn default() -> Self {
        Self::new()
    }
}

impl WalReplayer {
    /// Creates a replayer whose first commit id is 1.
    pub fn new() -> Self {
        Self::starting_at(CommitId::new(1))
    }

    /// Creates a replayer whose first commit id is `next_commit`.
    pub fn starting_at(next_commit: CommitId) -> Self {
        Self {
            tables: HashMap::new(),
            current: None,
            next_commit,
            next_txn: TransactionId::FIRST,
            stats: ReplayStats::default(),
        }
    }

    /// Makes `table` a replay target under its schema and table name.
    pub fn register(&mut self, table: Arc<DataTable>) {
        let key = (
            table.info().schema().to_string(),
            table.info().table().to_string(),
        );
        self.tables.insert(key, table);
    }

    /// Returns the commit id the next replayed change will get.
    ///
    /// A transaction manager resuming after replay starts here.
    pub fn next_commit_id(&self) -> CommitId {
        self.next_commit
    }

    /// Returns the counters so far.
    pub fn stats(&self) -> ReplayStats {
        self.stats
    }

    /// Applies every record of `records`, stopping at the first error.
    pub fn replay<I>(&mut self, records: I) -> QuarryResult<ReplayStats>
    where
        I: IntoIterator<Item = WalResult<LogRecord>>,
    {
        for record in records {
            let record = record?;
            self.apply(&record.payload)?;
        }
        info!(
            records = self.stats.records,
            inserted = self.stats.inserted_rows,
            deleted = self.stats.deleted_rows,
            updated = self.stats.updated_rows,
            "wal replay finished"
        );
        Ok(self.stats)
    }

    /// Applies one record.
    pub fn apply(&mut self, payload: &LogPayload) -> QuarryResult<()> {
        match payload {
            LogPayload::SetTable(set) => {
                let key = (set.schema.clone(), set.table.clone());
                let table = self.tables.get(&key).ok_or_else(|| {
                    QuarryError::invalid_argument(format!(
                        "log refers to unknown table '{}.{}'",
                        set.schema, set.table
                    ))
                })?;
                self.current = Some(Arc::clone(table));
            }
            LogPayload::Insert(insert) => {
                let (table, txn, commit_id) = self.begin()?;
                let mut state = table.initialize_append(&txn, insert.chunk.size())?;
                let row_start = state.row_start();
                let appended = table
                    .append(&insert.chunk, &mut state)
                    .and_then(|()| table.append_to_indexes(&insert.chunk, row_start));
                if let Err(e) = appended {
                    state.revert()?;
                    return Err(e);
                }
                state.commit(commit_id);
                self.stats.inserted_rows += insert.chunk.size() as u64;
            }
            LogPayload::Delete(delete) => {
                let (table, txn, commit_id) = self.begin()?;
                let deleted = match table.delete(&NoConstraints, &txn, &delete.row_ids) {
                    Ok(deleted) => deleted,
                    Err(e) => {
                        table.rollback_transaction(txn.transaction_id);
                        return Err(e);
                    }
                };
                table.commit_transaction(txn.transaction_id, commit_id);
                self.stats.deleted_rows += deleted as u64;
            }
            LogPayload::Update(update) => {
                let (table, txn, commit_id) = self.begin()?;
                if let Err(e) =
                    table.update_column(&txn, &update.row_ids, &update.column_path, &update.values)
                {
                    table.rollback_transaction(txn.transaction_id);
                    return Err(e);
                }
                table.commit_transaction(txn.transaction_id, commit_id);
                self.stats.updated_rows += update.row_ids.len() as u64;
            }
        }
        self.stats.records += 1;
        Ok(())
    }

    fn begin(&mut self) -> QuarryResult<(Arc<DataTable>, TransactionData, CommitId)> {
        let table = self
            .current
            .clone()
            .ok_or_else(|| QuarryError::corruption("data record before any table record"))?;
        let commit_id = self.next_commit;
        let txn = TransactionData::new(commit_id, self.next_txn);
        self.next_commit = commit_id.next();
        self.next_txn = self.next_txn.next();
        debug!(
            table = %table.info().qualified_name(),
            txn = %txn.transaction_id,
            commit_id = %commit_id,
            "replaying record"
        );
        Ok((table, txn, commit_id))
    }
}

impl fmt::Debug for WalReplayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalReplayer")
            .field("tables", &self.tables.len())
            .field("next_commit", &self.next_commit)
            .field("stats", &self.stats)
            .finish()
    }
}
