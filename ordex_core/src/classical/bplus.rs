//! B+-Tree variant: every key lives in a leaf, internal nodes hold separator
//! keys only, and leaves are chained left-to-right for range scans.
//!
//! Nodes live in a `generational_arena::Arena` and link through `Index`
//! handles. The arena sidesteps shared ownership for the forward leaf chain,
//! which a `Box`-owning tree cannot express.

use crate::{Key, OrderedIndex};
use generational_arena::{Arena, Index};

#[derive(Debug)]
struct Node<K, const ORDER: usize> {
    is_leaf: bool,
    keys: Vec<K>,
    children: Vec<Index>,
    next_leaf: Option<Index>,
}

impl<K, const ORDER: usize> Node<K, ORDER> {
    fn new(is_leaf: bool) -> Self {
        Self {
            is_leaf,
            keys: Vec::new(),
            children: Vec::new(),
            next_leaf: None,
        }
    }

    fn is_full(&self) -> bool {
        self.keys.len() == 2 * ORDER - 1
    }
}

/// B+-Tree of order `ORDER`. Lookups descend by `key >= separator` and
/// binary-search the candidate leaf; range scans walk the leaf chain.
pub struct BPlusTree<K, const ORDER: usize> {
    arena: Arena<Node<K, ORDER>>,
    root: Index,
    len: usize,
}

impl<K: Key, const ORDER: usize> Default for BPlusTree<K, ORDER> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Key, const ORDER: usize> BPlusTree<K, ORDER> {
    pub fn new() -> Self {
        let mut arena = Arena::new();
        let root = arena.insert(Node::new(true));
        Self { arena, root, len: 0 }
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, key: K) {
        if self.arena[self.root].is_full() {
            let old_root = self.root;
            let new_root = self.arena.insert(Node::new(false));
            self.arena[new_root].children.push(old_root);
            self.split_child(new_root, 0);
            self.root = new_root;
        }
        self.insert_non_full(self.root, key);
        self.len += 1;
    }

    pub fn search(&self, key: &K) -> bool {
        let leaf = self.find_leaf(key);
        self.arena[leaf].keys.binary_search(key).is_ok()
    }

    /// All keys in `[lo, hi]` in ascending order, collected by locating the
    /// starting leaf and following the chain.
    pub fn range_search(&self, lo: &K, hi: &K) -> Vec<K> {
        let mut out = Vec::new();
        if lo > hi || self.len == 0 {
            return out;
        }

        let mut leaf = self.find_leaf(lo);
        for key in &self.arena[leaf].keys {
            if key >= lo && key <= hi {
                out.push(*key);
            }
        }

        while let Some(next) = self.arena[leaf].next_leaf {
            if self.arena[next].keys.first().map_or(true, |first| first > hi) {
                break;
            }
            leaf = next;
            for key in &self.arena[leaf].keys {
                if key > hi {
                    break;
                }
                out.push(*key);
            }
        }
        out
    }

    /// Rank of `key` among stored keys, if present: walks the leaf chain up
    /// to the candidate leaf. Facade helper, not the benchmark path.
    pub fn position_of(&self, key: &K) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        let target = self.find_leaf(key);
        let offset = self.arena[target].keys.binary_search(key).ok()?;

        let mut count = 0;
        let mut leaf = self.first_leaf();
        while leaf != target {
            count += self.arena[leaf].keys.len();
            leaf = self.arena[leaf].next_leaf?;
        }
        Some(count + offset)
    }

    /// Byte estimate: arena slots at declared capacity plus every node's key
    /// and child vector capacity.
    pub fn memory_usage(&self) -> usize {
        let mut bytes = self.arena.capacity() * std::mem::size_of::<Node<K, ORDER>>();
        for (_, node) in self.arena.iter() {
            bytes += node.keys.capacity() * std::mem::size_of::<K>();
            bytes += node.children.capacity() * std::mem::size_of::<Index>();
        }
        bytes
    }

    fn find_leaf(&self, key: &K) -> Index {
        let mut current = self.root;
        while !self.arena[current].is_leaf {
            let node = &self.arena[current];
            let idx = node.keys.partition_point(|separator| key >= separator);
            current = node.children[idx];
        }
        current
    }

    fn first_leaf(&self) -> Index {
        let mut current = self.root;
        while !self.arena[current].is_leaf {
            current = self.arena[current].children[0];
        }
        current
    }

    fn split_child(&mut self, parent: Index, index: usize) {
        let child = self.arena[parent].children[index];
        let is_leaf = self.arena[child].is_leaf;
        let right = self.arena.insert(Node::new(is_leaf));

        let separator = if is_leaf {
            // Upper half moves out; the separator is a copy of the new
            // leaf's first key and stays in the leaf as well.
            let right_keys = self.arena[child].keys.split_off(ORDER);
            let separator = right_keys[0];
            self.arena[right].keys = right_keys;
            self.arena[right].next_leaf = self.arena[child].next_leaf;
            self.arena[child].next_leaf = Some(right);
            separator
        } else {
            // The middle separator moves up and out of the child.
            let mid = ORDER - 1;
            let separator = self.arena[child].keys[mid];
            let right_keys = self.arena[child].keys.split_off(mid + 1);
            self.arena[child].keys.truncate(mid);
            let right_children = self.arena[child].children.split_off(mid + 1);
            self.arena[right].keys = right_keys;
            self.arena[right].children = right_children;
            separator
        };

        let parent_node = &mut self.arena[parent];
        parent_node.keys.insert(index, separator);
        parent_node.children.insert(index + 1, right);
    }

    fn insert_non_full(&mut self, node: Index, key: K) {
        if self.arena[node].is_leaf {
            let keys = &mut self.arena[node].keys;
            let idx = keys.partition_point(|k| *k <= key);
            keys.insert(idx, key);
            return;
        }

        let mut idx = self.arena[node].keys.partition_point(|k| *k <= key);
        if self.arena[self.arena[node].children[idx]].is_full() {
            self.split_child(node, idx);
            if key >= self.arena[node].keys[idx] {
                idx += 1;
            }
        }
        let child = self.arena[node].children[idx];
        self.insert_non_full(child, key);
    }
}

impl<K: Key, const ORDER: usize> OrderedIndex<K> for BPlusTree<K, ORDER> {
    fn build(&mut self, keys: &[K]) {
        *self = Self::new();
        for &key in keys {
            self.insert(key);
        }
    }

    fn lookup(&self, key: K) -> Option<usize> {
        self.position_of(&key)
    }

    fn range_query(&self, lo: K, hi: K) -> Vec<K> {
        self.range_search(&lo, &hi)
    }

    fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>() + self.memory_usage()
    }
}
