//! Undo chains of in-place updates.
//!
//! Updates overwrite the segment buffer directly. The value they replaced is
//! pushed onto the row's undo chain, tagged with the updating transaction's
//! version. A reader walks the chain from the newest entry and restores old
//! values until it reaches an entry whose version it can see.
//!
//! ```text
//! buffer[7] = 'c'
//! chain[7]  = [ {v: txn:4, old: 'b'}, {v: 12, old: 'a'} ]
//!                 newest ────────────────────▶ oldest
//!
//! reader(start 20)        sees 'b'   (txn:4 invisible, 12 visible)
//! reader(start 10)        sees 'a'
//! txn:4                   sees 'c'
//! ```

use std::collections::BTreeMap;
use std::ops::Range;

use quarry_common::types::{is_committed_version, CommitId, TransactionData, TransactionId, Value};

#[derive(Debug, Clone)]
struct UndoEntry {
    version: u64,
    old_value: Value,
}

/// Per-row undo chains of one column segment.
///
/// Chains are stored oldest first; the newest entry is the last one.
#[derive(Debug, Default)]
pub struct UpdateSegment {
    chains: BTreeMap<usize, Vec<UndoEntry>>,
}

impl UpdateSegment {
    /// Creates an empty update segment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no row has an undo chain.
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Returns the number of rows with an undo chain.
    pub fn updated_rows(&self) -> usize {
        self.chains.len()
    }

    /// Returns true if a row in `range` has an undo chain.
    pub fn has_updates_in(&self, range: Range<usize>) -> bool {
        self.chains.range(range).next().is_some()
    }

    /// Returns the version of the newest update of `offset` if `txn` may not
    /// overwrite it.
    pub fn conflict(&self, txn: &TransactionData, offset: usize) -> Option<u64> {
        let newest = self.chains.get(&offset)?.last()?;
        (!txn.is_visible(newest.version)).then_some(newest.version)
    }

    /// Records that `txn_version` replaced `old_value` at `offset`.
    pub fn record(&mut self, offset: usize, txn_version: u64, old_value: Value) {
        self.chains.entry(offset).or_default().push(UndoEntry {
            version: txn_version,
            old_value,
        });
    }

    /// Rewrites `values` (the buffer rows starting at `base`) into the image
    /// `view` sees.
    pub fn apply(&self, view: &TransactionData, base: usize, values: &mut [Value]) {
        for (&offset, chain) in self.chains.range(base..base + values.len()) {
            Self::undo_invisible(view, chain, &mut values[offset - base]);
        }
    }

    /// Returns the value of row `offset` as `view` sees it.
    pub fn fetch(&self, view: &TransactionData, offset: usize, current: &Value) -> Value {
        let mut value = current.clone();
        if let Some(chain) = self.chains.get(&offset) {
            Self::undo_invisible(view, chain, &mut value);
        }
        value
    }

    fn undo_invisible(view: &TransactionData, chain: &[UndoEntry], value: &mut Value) {
        for entry in chain.iter().rev() {
            if view.is_visible(entry.version) {
                break;
            }
            *value = entry.old_value.clone();
        }
    }

    /// Stamps `commit_id` on every update `txn` made to `offset`.
    pub fn commit(&mut self, offset: usize, txn: TransactionId, commit_id: CommitId) {
        if let Some(chain) = self.chains.get_mut(&offset) {
            for entry in chain.iter_mut().rev() {
                if entry.version == txn.as_u64() {
                    entry.version = commit_id.as_u64();
                }
            }
        }
    }

    /// Pops the newest entry of `offset` if `txn` wrote it, returning the
    /// value to restore.
    pub fn pop_own(&mut self, offset: usize, txn: TransactionId) -> Option<Value> {
        let chain = self.chains.get_mut(&offset)?;
        if chain.last()?.version != txn.as_u64() {
            return None;
        }
        let entry = chain.pop()?;
        if chain.is_empty() {
            self.chains.remove(&offset);
        }
        Some(entry.old_value)
    }

    /// Drops the chains of rows at or after `offset`.
    pub fn truncate_from(&mut self, offset: usize) {
        self.chains.split_off(&offset);
    }

    /// Drops entries no reader can reach.
    ///
    /// Every active reader has a start time of at least `lowest_active_start`,
    /// so it stops at the newest committed entry below that point and never
    /// looks further back. Returns the number of entries removed.
    pub fn cleanup(&mut self, lowest_active_start: CommitId) -> usize {
        let mut removed = 0;
        self.chains.retain(|_, chain| {
            let reachable = chain
                .iter()
                .rposition(|entry| {
                    is_committed_version(entry.version)
                        && entry.version < lowest_active_start.as_u64()
                })
                .map_or(0, |stop| stop + 1);
            removed += reachable;
            chain.drain(..reachable);
            !chain.is_empty()
        });
        removed
    }
}
