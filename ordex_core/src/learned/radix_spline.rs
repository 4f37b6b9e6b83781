//! RadixSpline: a radix table over key prefixes routing into a spline of
//! key-to-position control points, finished with linear interpolation.
//!
//! The spline admits a control point for every distinct key, which makes it
//! an identity spline (memory proportional to the key count) rather than an
//! error-bounded compression. That is the behavior of the system this
//! engine reproduces; the radix table still keeps the per-lookup spline
//! search short.

use crate::learned::widen;
use crate::search::{upper_bound, BinarySearch, OptimalSearch, Search};
use crate::{Key, OrderedIndex};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use tracing::debug;

/// Default width of the radix prefix in bits.
pub const DEFAULT_RADIX_BITS: usize = 18;

/// A control point anchoring the spline: key `x` sits at position `y`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplinePoint<K> {
    pub x: K,
    pub y: f64,
}

impl<K> Borrow<K> for SplinePoint<K> {
    fn borrow(&self) -> &K {
        &self.x
    }
}

/// Half-open position window guaranteed to contain a query key's position
/// if the key is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchBound {
    pub begin: usize,
    pub end: usize,
}

/// Radix-routed spline index over a sorted key array.
pub struct RadixSpline<K: Key> {
    data: Vec<K>,
    min_key: K,
    max_key: K,
    num_keys: usize,
    spline_points: Vec<SplinePoint<K>>,
    num_radix_bits: usize,
    num_buckets: usize,
    radix_table: Vec<usize>,
}

impl<K: Key> Default for RadixSpline<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Key> RadixSpline<K> {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            min_key: K::zero(),
            max_key: K::zero(),
            num_keys: 0,
            spline_points: Vec::new(),
            num_radix_bits: DEFAULT_RADIX_BITS,
            num_buckets: 1 << DEFAULT_RADIX_BITS,
            radix_table: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn spline_point_count(&self) -> usize {
        self.spline_points.len()
    }

    pub fn radix_table_len(&self) -> usize {
        self.radix_table.len()
    }

    /// Drops the indexed keys and spline, keeping the configured table
    /// width.
    pub fn clear(&mut self) {
        self.data.clear();
        self.spline_points.clear();
        self.radix_table = vec![0; self.num_buckets + 1];
        self.num_keys = 0;
    }

    /// Indexes `keys` with the default radix width.
    pub fn build(&mut self, keys: &[K]) {
        self.build_with_bits(keys, DEFAULT_RADIX_BITS);
    }

    /// Indexes `keys` (sorted, deduplicated) under a `num_radix_bits`-bit
    /// prefix table.
    pub fn build_with_bits(&mut self, keys: &[K], num_radix_bits: usize) {
        self.data = keys.to_vec();
        self.data.sort_unstable();
        self.data.dedup();

        self.num_keys = self.data.len();
        self.min_key = self.data.first().copied().unwrap_or_else(K::zero);
        self.max_key = self.data.last().copied().unwrap_or_else(K::zero);
        self.num_radix_bits = num_radix_bits;
        self.num_buckets = 1 << num_radix_bits;
        self.radix_table = vec![0; self.num_buckets + 1];
        self.spline_points.clear();

        if self.data.is_empty() {
            return;
        }

        // One control point per distinct key; dedup above makes that every
        // key. The spline ends exactly on (max_key, num_keys - 1).
        self.spline_points.push(SplinePoint {
            x: self.min_key,
            y: 0.0,
        });
        for (position, &key) in self.data.iter().enumerate().skip(1) {
            if key != self.spline_points.last().unwrap().x {
                self.spline_points.push(SplinePoint {
                    x: key,
                    y: position as f64,
                });
            }
        }
        if self.spline_points.last().unwrap().x != self.max_key {
            self.spline_points.push(SplinePoint {
                x: self.max_key,
                y: (self.num_keys - 1) as f64,
            });
        }

        // Each bucket maps to the cursor where its key range begins in the
        // spline; a degenerate key domain leaves every bucket at zero.
        if self.max_key > self.min_key {
            let delta = widen(self.max_key - self.min_key) / self.num_buckets as f64;
            let mut cursor = 0usize;
            for bucket in 0..self.num_buckets {
                self.radix_table[bucket] = cursor;
                let boundary = self
                    .min_key
                    .checked_add(
                        &num::cast::<f64, K>((bucket as f64 + 1.0) * delta)
                            .unwrap_or_else(K::max_value),
                    )
                    .unwrap_or_else(K::max_value);
                while cursor + 1 < self.spline_points.len()
                    && self.spline_points[cursor + 1].x <= boundary
                {
                    cursor += 1;
                }
            }
        }
        self.radix_table[self.num_buckets] = self.spline_points.len() - 1;

        debug!(
            keys = self.num_keys,
            spline_points = self.spline_points.len(),
            radix_bits = self.num_radix_bits,
            "built radix spline"
        );
    }

    /// Position window for `key`, clamped to the spline's interpolation
    /// error for the owning segment. Keys outside `[min_key, max_key]` pin
    /// to the matching edge of the array.
    pub fn search_bound(&self, key: K) -> SearchBound {
        if self.data.is_empty() {
            return SearchBound { begin: 0, end: 0 };
        }
        if key <= self.min_key {
            return SearchBound { begin: 0, end: 1 };
        }
        if key >= self.max_key {
            return SearchBound {
                begin: self.num_keys - 1,
                end: self.num_keys,
            };
        }
        if self.spline_points.len() <= 1 {
            return SearchBound {
                begin: 0,
                end: self.num_keys,
            };
        }

        let radix_index = self.radix_index(key).min(self.radix_table.len() - 2);
        let spline_start = self.radix_table[radix_index];
        let spline_end = (self.radix_table[radix_index + 1] + 1).min(self.spline_points.len());

        // Owning segment: points[i].x <= key < points[i + 1].x.
        let window = &self.spline_points[spline_start..spline_end];
        let next = upper_bound(OptimalSearch::search_by_key_with_offset(
            window,
            &key,
            spline_start,
        ));
        let candidate = next.saturating_sub(1).min(self.spline_points.len() - 2);
        let segment_index = if self.spline_points[candidate].x <= key
            && key < self.spline_points[candidate + 1].x
        {
            candidate
        } else {
            // The lossy prefix normalization routed the key into a
            // neighboring bucket; resolve against the whole spline.
            upper_bound(BinarySearch::search_by_key(&self.spline_points, &key))
                .saturating_sub(1)
                .min(self.spline_points.len() - 2)
        };

        let p1 = self.spline_points[segment_index];
        let p2 = self.spline_points[segment_index + 1];

        let dx = widen(key.saturating_sub(p1.x));
        let dy = p2.y - p1.y;
        let dx_full = widen(p2.x - p1.x);
        let estimate = p1.y + (dx * dy) / dx_full;

        let error = dy.abs();
        let begin = (estimate - error).max(0.0) as usize;
        let end = ((estimate + error + 1.0).min(self.num_keys as f64)) as usize;
        SearchBound { begin, end }
    }

    pub fn lookup(&self, key: K) -> Option<usize> {
        if self.data.is_empty() {
            return None;
        }

        let bound = self.search_bound(key);
        let begin = bound.begin.min(self.data.len());
        let end = bound.end.min(self.data.len());
        if begin >= end {
            return None;
        }
        OptimalSearch::search_with_offset(&self.data[begin..end], &key, begin).ok()
    }

    /// All keys in `[lo, hi]`, ascending: the windows for both endpoints are
    /// unioned and scanned forward from the first key `>= lo`.
    pub fn range_query(&self, lo: K, hi: K) -> Vec<K> {
        if self.data.is_empty() || lo > hi {
            return Vec::new();
        }

        let begin = self.search_bound(lo).begin;
        let end = self.search_bound(hi).end.min(self.data.len());
        if begin >= end {
            return Vec::new();
        }

        let window = &self.data[begin..end];
        let start = window.partition_point(|&k| k < lo);
        window[start..]
            .iter()
            .take_while(|&&k| k <= hi)
            .copied()
            .collect()
    }

    /// Estimated bytes: spline points, the radix table, and the key array
    /// at declared capacity, plus fixed instance overhead.
    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.spline_points.capacity() * std::mem::size_of::<SplinePoint<K>>()
            + self.radix_table.capacity() * std::mem::size_of::<usize>()
            + self.data.capacity() * std::mem::size_of::<K>()
    }

    /// Bucket of `key`'s normalized prefix. Normalization runs through
    /// `f64`, so domains near the integer range limit lose the low bits;
    /// the spline search inside the bucket window absorbs the slack.
    fn radix_index(&self, key: K) -> usize {
        if key <= self.min_key {
            return 0;
        }
        if key >= self.max_key {
            return self.num_buckets - 1;
        }
        let normalized = widen(key - self.min_key) / widen(self.max_key - self.min_key);
        ((normalized * self.num_buckets as f64) as usize).min(self.num_buckets - 1)
    }
}

impl<K: Key> OrderedIndex<K> for RadixSpline<K> {
    fn build(&mut self, keys: &[K]) {
        RadixSpline::build(self, keys);
    }

    fn lookup(&self, key: K) -> Option<usize> {
        RadixSpline::lookup(self, key)
    }

    fn range_query(&self, lo: K, hi: K) -> Vec<K> {
        RadixSpline::range_query(self, lo, hi)
    }

    fn memory_usage(&self) -> usize {
        RadixSpline::memory_usage(self)
    }
}

#[cfg(test)]
mod radix_spline_tests {
    use super::*;
    use rand::{distributions::Uniform, thread_rng, Rng};

    fn hundreds() -> Vec<u64> {
        (1..=100).map(|i| i * 100).collect()
    }

    fn check_invariants<K: Key>(spline: &RadixSpline<K>) {
        assert!(spline
            .spline_points
            .windows(2)
            .all(|w| w[0].x < w[1].x));
        assert!(spline.radix_table.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(spline.radix_table[0], 0);
        assert_eq!(
            *spline.radix_table.last().unwrap(),
            spline.spline_point_count() - 1
        );
    }

    #[test]
    fn lookup_and_range_r4() {
        let mut spline: RadixSpline<u64> = RadixSpline::new();
        spline.build_with_bits(&hundreds(), 4);

        assert_eq!(spline.lookup(500), Some(4));
        assert_eq!(spline.lookup(501), None);
        assert_eq!(spline.range_query(250, 450), vec![300, 400]);
        check_invariants(&spline);
    }

    #[test]
    fn edge_keys_pin_to_array_edges() {
        let mut spline: RadixSpline<u64> = RadixSpline::new();
        spline.build_with_bits(&hundreds(), 4);

        assert_eq!(spline.search_bound(50), SearchBound { begin: 0, end: 1 });
        assert_eq!(
            spline.search_bound(20_000),
            SearchBound {
                begin: 99,
                end: 100
            }
        );
        assert_eq!(spline.lookup(100), Some(0));
        assert_eq!(spline.lookup(10_000), Some(99));
        assert_eq!(spline.lookup(50), None);
        assert_eq!(spline.lookup(20_000), None);
    }

    #[test]
    fn single_key_domain() {
        let mut spline: RadixSpline<u64> = RadixSpline::new();
        spline.build_with_bits(&[42, 42, 42], 6);

        assert_eq!(spline.len(), 1);
        assert_eq!(spline.lookup(42), Some(0));
        assert_eq!(spline.lookup(41), None);
        assert_eq!(spline.range_query(0, 100), vec![42]);
    }

    #[test]
    fn build_replaces_and_clear_empties() {
        let mut spline: RadixSpline<u64> = RadixSpline::new();
        spline.build_with_bits(&hundreds(), 4);
        spline.build_with_bits(&[7, 9], 4);
        assert_eq!(spline.lookup(500), None);
        assert_eq!(spline.lookup(9), Some(1));

        spline.clear();
        assert!(spline.is_empty());
        assert_eq!(spline.lookup(9), None);
        assert!(spline.range_query(0, 100).is_empty());
    }

    #[test]
    fn identity_spline_size() {
        let mut spline: RadixSpline<u64> = RadixSpline::new();
        spline.build_with_bits(&hundreds(), 4);
        // One control point per distinct key.
        assert_eq!(spline.spline_point_count(), 100);
        assert_eq!(spline.radix_table_len(), (1 << 4) + 1);
    }

    /// Every key must be found under any table width.
    macro_rules! test_radix_bits {
        ($name:ident, $bits:expr) => {
            #[test]
            fn $name() {
                let mut rng = thread_rng();
                let mut keys: Vec<u64> = (&mut rng)
                    .sample_iter(Uniform::new(0u64, u64::MAX))
                    .take(20_000)
                    .collect();
                keys.sort_unstable();
                keys.dedup();

                let mut spline: RadixSpline<u64> = RadixSpline::new();
                spline.build_with_bits(&keys, $bits);
                check_invariants(&spline);

                for (position, key) in keys.iter().enumerate() {
                    assert_eq!(spline.lookup(*key), Some(position));
                }
                for absent in [1u64, 12_345, u64::MAX - 1] {
                    if keys.binary_search(&absent).is_err() {
                        assert_eq!(spline.lookup(absent), None);
                    }
                }
            }
        };
    }
    test_radix_bits!(lookup_all_r2, 2);
    test_radix_bits!(lookup_all_r10, 10);
    test_radix_bits!(lookup_all_r18, 18);

    #[test]
    fn random_ranges_match_filter() {
        let mut rng = thread_rng();
        let mut keys: Vec<u64> = (&mut rng)
            .sample_iter(Uniform::new(0u64, 1_000_000))
            .take(5_000)
            .collect();
        keys.sort_unstable();
        keys.dedup();

        let mut spline: RadixSpline<u64> = RadixSpline::new();
        spline.build_with_bits(&keys, 10);

        for _ in 0..50 {
            let a = rng.gen_range(0u64..1_000_000);
            let b = rng.gen_range(0u64..1_000_000);
            let (lo, hi) = (a.min(b), a.max(b));
            let expected: Vec<u64> =
                keys.iter().copied().filter(|k| (lo..=hi).contains(k)).collect();
            assert_eq!(spline.range_query(lo, hi), expected, "range [{lo}, {hi}]");
        }
        assert!(spline.range_query(10, 5).is_empty());
    }
}
