//! Tagged sum over the five index backends, so a workload can be pointed at
//! any of them through one type.

use crate::{
    BPlusTree, BTree, FitingTree, Key, OrderedIndex, RadixSpline, Rmi, DEFAULT_ORDER,
};

/// One of the five engines, each behind its default configuration.
pub enum Engine<K: Key> {
    BTree(BTree<K, DEFAULT_ORDER>),
    BPlusTree(BPlusTree<K, DEFAULT_ORDER>),
    Rmi(Rmi<K>),
    FitingTree(FitingTree<K>),
    RadixSpline(RadixSpline<K>),
}

impl<K: Key> Engine<K> {
    pub fn btree() -> Self {
        Self::BTree(BTree::new())
    }

    pub fn bplus_tree() -> Self {
        Self::BPlusTree(BPlusTree::new())
    }

    pub fn rmi() -> Self {
        Self::Rmi(Rmi::new())
    }

    pub fn fiting_tree() -> Self {
        Self::FitingTree(FitingTree::new())
    }

    pub fn radix_spline() -> Self {
        Self::RadixSpline(RadixSpline::new())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::BTree(_) => "btree",
            Self::BPlusTree(_) => "bplus_tree",
            Self::Rmi(_) => "rmi",
            Self::FitingTree(_) => "fiting_tree",
            Self::RadixSpline(_) => "radix_spline",
        }
    }

    /// Whether [`Engine::insert`] reaches a real insertion path.
    pub fn supports_insert(&self) -> bool {
        matches!(self, Self::BTree(_) | Self::BPlusTree(_))
    }

    /// Inserts into the tree engines; returns `false` on the build-only
    /// engines, which index a fixed key array.
    pub fn insert(&mut self, key: K) -> bool {
        match self {
            Self::BTree(tree) => {
                tree.insert(key);
                true
            }
            Self::BPlusTree(tree) => {
                tree.insert(key);
                true
            }
            _ => false,
        }
    }

    /// Removes from the B-Tree; every other engine refuses.
    pub fn remove(&mut self, key: K) -> bool {
        match self {
            Self::BTree(tree) => tree.remove(&key),
            _ => false,
        }
    }
}

impl<K: Key> OrderedIndex<K> for Engine<K> {
    fn build(&mut self, keys: &[K]) {
        match self {
            Self::BTree(tree) => tree.build(keys),
            Self::BPlusTree(tree) => tree.build(keys),
            Self::Rmi(index) => index.build(keys),
            Self::FitingTree(index) => index.build(keys),
            Self::RadixSpline(index) => index.build(keys),
        }
    }

    fn lookup(&self, key: K) -> Option<usize> {
        match self {
            Self::BTree(tree) => tree.lookup(key),
            Self::BPlusTree(tree) => tree.lookup(key),
            Self::Rmi(index) => index.lookup(key),
            Self::FitingTree(index) => index.lookup(key),
            Self::RadixSpline(index) => index.lookup(key),
        }
    }

    fn range_query(&self, lo: K, hi: K) -> Vec<K> {
        match self {
            Self::BTree(tree) => OrderedIndex::range_query(tree, lo, hi),
            Self::BPlusTree(tree) => OrderedIndex::range_query(tree, lo, hi),
            Self::Rmi(index) => index.range_query(lo, hi),
            Self::FitingTree(index) => index.range_query(lo, hi),
            Self::RadixSpline(index) => index.range_query(lo, hi),
        }
    }

    fn memory_usage(&self) -> usize {
        match self {
            Self::BTree(tree) => OrderedIndex::memory_usage(tree),
            Self::BPlusTree(tree) => OrderedIndex::memory_usage(tree),
            Self::Rmi(index) => index.memory_usage(),
            Self::FitingTree(index) => index.memory_usage(),
            Self::RadixSpline(index) => index.memory_usage(),
        }
    }
}
