//! The ordered sequence of row groups backing a table.

use std::sync::Arc;

use parking_lot::RwLock;

/// A node covering a contiguous range of row ids.
pub trait SegmentNode {
    /// First row id covered by the node.
    fn start(&self) -> u64;

    /// Number of rows currently held by the node.
    fn count(&self) -> u64;
}

/// An append-only sequence of nodes ordered by start row.
///
/// Nodes are only ever added at the tail; readers take a snapshot of the
/// node list and keep a stable view while the tail grows.
pub struct SegmentTree<T> {
    nodes: RwLock<Vec<Arc<T>>>,
}

impl<T> Default for SegmentTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SegmentTree<T> {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
        }
    }

    /// Creates a tree from ordered nodes.
    pub fn from_nodes(nodes: Vec<Arc<T>>) -> Self {
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Appends a node at the tail.
    pub fn append(&self, node: Arc<T>) {
        self.nodes.write().push(node);
    }

    /// Returns a snapshot of all nodes.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.nodes.read().clone()
    }

    /// Returns the tail node.
    pub fn last(&self) -> Option<Arc<T>> {
        self.nodes.read().last().cloned()
    }

    /// Returns the node at `index`.
    pub fn get(&self, index: usize) -> Option<Arc<T>> {
        self.nodes.read().get(index).cloned()
    }

    /// Returns the number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Returns true if the tree has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Drops every node from `index` on, returning the dropped nodes.
    pub fn truncate_from(&self, index: usize) -> Vec<Arc<T>> {
        let mut nodes = self.nodes.write();
        if index >= nodes.len() {
            return Vec::new();
        }
        nodes.split_off(index)
    }
}

impl<T: SegmentNode> SegmentTree<T> {
    /// Returns the index of the node whose range contains `row`.
    pub fn find_index(&self, row: u64) -> Option<usize> {
        let nodes = self.nodes.read();
        let index = nodes.partition_point(|node| node.start() <= row).checked_sub(1)?;
        let node = &nodes[index];
        (row < node.start() + node.count()).then_some(index)
    }

    /// Returns the node whose range contains `row`.
    pub fn find(&self, row: u64) -> Option<Arc<T>> {
        let index = self.find_index(row)?;
        self.get(index)
    }
}
