//! Secondary indexes attached to a table.
//!
//! The table only relies on the [`Index`] capability: insert keys, remove
//! keys and scan a key range. [`TableIndexList`] keeps the attached indexes
//! behind one lock.
//!
//! Entries follow the latest state of the table, pending changes included.
//! A deleted row keeps its entries until the delete commits, and an updated
//! row holds both its old and new keys until the update commits or rolls
//! back. A lookup may therefore return a row whose visible key differs from
//! the one searched for.
//!
//! # Lock Order
//!
//! The list lock is held only to copy the entries out. Callbacks run after
//! it is released, so an index may take its own internal lock without
//! nesting it under the list lock.

mod ordered;

pub use ordered::OrderedIndex;

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::Mutex;
use quarry_common::error::QuarryResult;
use quarry_common::types::{DataChunk, RowId, Value};

/// A secondary index over some table columns.
pub trait Index: Send + Sync + fmt::Debug {
    /// Index name.
    fn name(&self) -> &str;

    /// Table columns forming the key, in key order.
    fn column_ids(&self) -> &[usize];

    /// True if the index rejects duplicate non-NULL keys.
    fn is_unique(&self) -> bool;

    /// Inserts one entry per row.
    ///
    /// `keys` holds one vector per key column. On error no entry of this
    /// call remains in the index.
    fn append(&self, keys: &DataChunk, row_ids: &[RowId]) -> QuarryResult<()>;

    /// Removes one entry per row.
    fn delete(&self, keys: &DataChunk, row_ids: &[RowId]);

    /// Returns the row ids of every key in the range, in key order.
    fn scan_range(&self, lower: Bound<&[Value]>, upper: Bound<&[Value]>) -> Vec<RowId>;

    /// Returns the row ids stored under `key`.
    fn lookup(&self, key: &[Value]) -> Vec<RowId> {
        self.scan_range(Bound::Included(key), Bound::Included(key))
    }

    /// Returns the number of entries.
    fn len(&self) -> usize;

    /// Returns true if the index holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Identity of an index within a [`TableIndexList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexId(u64);

impl IndexId {
    /// Returns the raw id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "index:{}", self.0)
    }
}

#[derive(Default)]
struct IndexListInner {
    next_id: u64,
    indexes: BTreeMap<IndexId, Arc<dyn Index>>,
}

/// The indexes attached to a table.
#[derive(Default)]
pub struct TableIndexList {
    inner: Mutex<IndexListInner>,
}

impl TableIndexList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches an index and returns its identity.
    pub fn add_index(&self, index: Arc<dyn Index>) -> IndexId {
        let mut inner = self.inner.lock();
        let id = IndexId(inner.next_id);
        inner.next_id += 1;
        inner.indexes.insert(id, index);
        id
    }

    /// Detaches an index.
    pub fn remove_index(&self, id: IndexId) -> Option<Arc<dyn Index>> {
        self.inner.lock().indexes.remove(&id)
    }

    /// Returns a snapshot of the attached indexes, in attach order.
    pub fn snapshot(&self) -> Vec<(IndexId, Arc<dyn Index>)> {
        self.inner
            .lock()
            .indexes
            .iter()
            .map(|(&id, index)| (id, Arc::clone(index)))
            .collect()
    }

    /// Calls `callback` for each index until it returns true.
    ///
    /// The callback runs without the list lock held.
    pub fn scan<F>(&self, mut callback: F)
    where
        F: FnMut(&Arc<dyn Index>) -> bool,
    {
        for (_, index) in self.snapshot() {
            if callback(&index) {
                break;
            }
        }
    }

    /// Returns the index with the given name.
    pub fn find(&self, name: &str) -> Option<(IndexId, Arc<dyn Index>)> {
        self.snapshot()
            .into_iter()
            .find(|(_, index)| index.name() == name)
    }

    /// Returns true if an index's key reads `column`.
    pub fn depends_on(&self, column: usize) -> bool {
        let mut found = false;
        self.scan(|index| {
            found = index.column_ids().contains(&column);
            found
        });
        found
    }

    /// Returns the highest column id any index reads.
    pub fn max_column(&self) -> Option<usize> {
        let mut max = None;
        self.scan(|index| {
            max = index.column_ids().iter().copied().chain(max).max();
            false
        });
        max
    }

    /// Returns the number of attached indexes.
    pub fn count(&self) -> usize {
        self.inner.lock().indexes.len()
    }

    /// Returns true if no index is attached.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().indexes.is_empty()
    }
}

impl fmt::Debug for TableIndexList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableIndexList")
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_remove_and_scan() {
        let list = TableIndexList::new();
        assert!(list.is_empty());
        let a = list.add_index(Arc::new(OrderedIndex::new("a", vec![0], false)));
        let b = list.add_index(Arc::new(OrderedIndex::new("b", vec![2, 1], true)));
        assert_ne!(a, b);
        assert_eq!(list.count(), 2);
        assert!(list.depends_on(1));
        assert!(!list.depends_on(3));
        assert_eq!(list.max_column(), Some(2));

        let mut visited = Vec::new();
        list.scan(|index| {
            visited.push(index.name().to_string());
            true
        });
        assert_eq!(visited, vec!["a"]);

        assert_eq!(list.find("b").map(|(id, _)| id), Some(b));
        assert!(list.remove_index(a).is_some());
        assert!(list.remove_index(a).is_none());
        assert_eq!(list.count(), 1);
    }

    #[test]
    fn test_callback_may_touch_list() {
        let list = TableIndexList::new();
        list.add_index(Arc::new(OrderedIndex::new("a", vec![0], false)));
        // the list lock is released while the callback runs
        list.scan(|_| {
            assert_eq!(list.count(), 1);
            false
        });
    }
}
