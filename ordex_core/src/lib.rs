//! In-memory, read-optimized ordered indexes over unsigned integer keys.
//!
//! Five interchangeable engines implement the same contract over a sorted
//! key sequence: a classical [`BTree`], a leaf-linked [`BPlusTree`], a
//! two-stage [`Rmi`], a piecewise-linear [`FitingTree`], and a
//! [`RadixSpline`]. The learned engines predict a position from the key and
//! then run a bounded search inside an error envelope; the trees search
//! structurally. [`Engine`] wraps any of the five behind one tagged type so
//! workloads can be driven against each backend side by side.

use num::{PrimInt, Unsigned};
use std::fmt::Debug;
use trait_set::trait_set;

pub mod classical;
pub mod engine;
pub mod error;
pub mod learned;
pub mod search;

pub use classical::{BPlusTree, BTree};
pub use engine::Engine;
pub use error::LoadError;
pub use learned::{FitingTree, RadixSpline, Rmi};

// Until `trait_alias` is stabilized, we have to use a macro
trait_set! {
    /// Key type: an unsigned primitive integer. Learned engines widen keys
    /// to `f64` through `num::cast` for model arithmetic.
    pub trait Key = PrimInt + Unsigned + Debug;
}

/// Node capacity parameter shared by the tree engines: a node holds at most
/// `2 * ORDER - 1` keys and every non-root node holds at least `ORDER - 1`.
pub const DEFAULT_ORDER: usize = 5;

/// The contract every engine satisfies once built over a key sequence.
///
/// Positions are zero-based indices into the sorted, deduplicated key
/// sequence. Queries never mutate; `build` replaces any prior state.
pub trait OrderedIndex<K: Key> {
    /// Index the given keys, replacing any prior state.
    fn build(&mut self, keys: &[K]);

    /// Returns the position of `key` in the sorted key sequence, or `None`
    /// if the key is absent.
    fn lookup(&self, key: K) -> Option<usize>;

    /// Returns every indexed key in `[lo, hi]` in ascending order.
    /// Empty when `lo > hi`.
    fn range_query(&self, lo: K, hi: K) -> Vec<K>;

    /// Estimated resident size in bytes: key storage, structural metadata,
    /// and fixed per-instance overhead. Vector contributions use declared
    /// capacity, not live length.
    fn memory_usage(&self) -> usize;
}
