//! FITing-Tree: piecewise-linear segmentation with a bounded residual,
//! indexed through a companion B-Tree and absorbing inserts through
//! per-segment delta buffers.
//!
//! `build_segments` sweeps the sorted key array left to right, extending the
//! current segment while an incrementally refit least-squares line keeps
//! every covered position within `epsilon` of its prediction. Each emitted
//! segment records the last fit that passed the check together with the
//! ceiling of its observed residual, so the recorded error genuinely bounds
//! the recorded model over the covered range.

use crate::classical::BTree;
use crate::learned::{widen, LinearModel};
use crate::search::{lower_bound, upper_bound, OptimalSearch, Search};
use crate::{Key, OrderedIndex, DEFAULT_ORDER};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default residual budget for segmentation.
pub const DEFAULT_EPSILON: usize = 32;

/// Default capacity of each per-segment delta buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 64;

/// Entry type of the companion segment index, ordered by
/// `(start_key, segment_id)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct SegmentKey<K> {
    start_key: K,
    segment_id: usize,
}

/// One linear segment: a model over the inclusive positional range
/// `[start_position, end_position]` of the key array it was fit against.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Segment<K> {
    start_key: K,
    model: LinearModel,
    max_error: i64,
    start_position: usize,
    end_position: usize,
    /// Span at fit time; the in-place insert path rebuilds everything once
    /// a segment's live span grows past twice this.
    built_span: usize,
}

impl<K: Key> Segment<K> {
    pub fn start_key(&self) -> K {
        self.start_key
    }

    pub fn max_error(&self) -> i64 {
        self.max_error
    }

    /// Inclusive positional range covered by this segment.
    pub fn positions(&self) -> (usize, usize) {
        (self.start_position, self.end_position)
    }

    pub fn model(&self) -> LinearModel {
        self.model
    }

    /// Inclusive search envelope for `key` inside an array of `len` keys.
    /// Empty envelopes come back as `None`.
    fn envelope(&self, key: K, len: usize) -> Option<(usize, usize)> {
        let predicted = self.model.predict(key).round() as i64;
        let last = len as i64 - 1;
        let lo = (predicted - self.max_error)
            .max(self.start_position as i64)
            .clamp(0, last);
        let hi = (predicted + self.max_error)
            .min(self.end_position as i64)
            .clamp(0, last);
        (lo <= hi).then_some((lo as usize, hi as usize))
    }
}

#[derive(Clone, Debug)]
struct DeltaBuffer<K> {
    keys: Vec<K>,
    capacity: usize,
}

enum DeltaInsert {
    Inserted,
    Duplicate,
    Full,
}

impl<K: Key> DeltaBuffer<K> {
    fn new(capacity: usize) -> Self {
        Self {
            keys: Vec::new(),
            capacity,
        }
    }

    fn insert(&mut self, key: K) -> DeltaInsert {
        if self.keys.len() >= self.capacity {
            return DeltaInsert::Full;
        }
        match self.keys.binary_search(&key) {
            Ok(_) => DeltaInsert::Duplicate,
            Err(index) => {
                self.keys.insert(index, key);
                DeltaInsert::Inserted
            }
        }
    }
}

/// Piecewise-linear index over a sorted key array.
pub struct FitingTree<K: Key> {
    epsilon: usize,
    segments: Vec<Segment<K>>,
    segment_index: BTree<SegmentKey<K>, DEFAULT_ORDER>,
    data: Vec<K>,
    delta_buffers: Vec<DeltaBuffer<K>>,
    buffer_capacity: usize,
}

impl<K: Key> Default for FitingTree<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Key> FitingTree<K> {
    pub fn new() -> Self {
        Self::with_epsilon(DEFAULT_EPSILON)
    }

    pub fn with_epsilon(epsilon: usize) -> Self {
        Self {
            epsilon,
            segments: Vec::new(),
            segment_index: BTree::new(),
            data: Vec::new(),
            delta_buffers: Vec::new(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }

    pub fn epsilon(&self) -> usize {
        self.epsilon
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> &[Segment<K>] {
        &self.segments
    }

    /// The indexed keys in sorted order, excluding anything still staged in
    /// delta buffers.
    pub fn keys(&self) -> &[K] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Replaces all state with an index over `keys` (sorted, deduplicated).
    pub fn build(&mut self, keys: &[K]) {
        self.data = keys.to_vec();
        self.data.sort_unstable();
        self.data.dedup();
        self.build_segments();
        self.reset_buffers();
    }

    pub fn lookup(&self, key: K) -> Option<usize> {
        if self.data.is_empty() || self.segments.is_empty() {
            return None;
        }
        let segment = &self.segments[self.find_segment_index(key)];
        let (lo, hi) = segment.envelope(key, self.data.len())?;
        OptimalSearch::search_with_offset(&self.data[lo..=hi], &key, lo).ok()
    }

    /// All keys in `[lo, hi]`, ascending: each overlapped segment
    /// contributes the slice of its positional range that the per-endpoint
    /// envelopes select.
    pub fn range_query(&self, lo: K, hi: K) -> Vec<K> {
        let mut out = Vec::new();
        if self.data.is_empty() || self.segments.is_empty() || lo > hi {
            return out;
        }

        let first = self.find_segment_index(lo);
        let last = self.find_segment_index(hi);

        for index in first..=last.min(self.segments.len() - 1) {
            let segment = &self.segments[index];
            let window_lo = lo.max(segment.start_key);
            let window_hi = match self.segments.get(index + 1) {
                Some(next) => hi.min(next.start_key.saturating_sub(K::one())),
                None => hi,
            };
            if window_lo > window_hi {
                continue;
            }

            let Some((start_env, _)) = segment.envelope(window_lo, self.data.len()) else {
                continue;
            };
            let Some((_, end_env)) = segment.envelope(window_hi, self.data.len()) else {
                continue;
            };
            if start_env > end_env {
                continue;
            }

            let window = &self.data[start_env..=end_env];
            let from =
                lower_bound(OptimalSearch::search_with_offset(window, &window_lo, start_env));
            let to = if from > end_env {
                from
            } else {
                upper_bound(OptimalSearch::search_with_offset(
                    &self.data[from..=end_env],
                    &window_hi,
                    from,
                ))
            };
            out.extend_from_slice(&self.data[from..to]);
        }
        out
    }

    /// Inserts directly into the key array. Returns `false` for a key that
    /// is already present. Every segment whose endpoints sit at or after
    /// the insertion point shifts right; the affected segment triggers a
    /// full rebuild once its span has more than doubled since it was fit.
    pub fn insert_in_place(&mut self, key: K) -> bool {
        if self.data.is_empty() || self.segments.is_empty() {
            self.data.push(key);
            self.build_segments();
            self.reset_buffers();
            return true;
        }

        let segment_id = self.find_segment_index(key);
        let insert_pos = match self.segments[segment_id].envelope(key, self.data.len()) {
            Some((lo, hi)) => {
                let pos =
                    lower_bound(OptimalSearch::search_with_offset(&self.data[lo..=hi], &key, lo));
                // A result pinned to an envelope edge may have drifted out
                // of the window; the array must stay sorted, so redo the
                // search over all of it.
                if pos == lo || pos > hi {
                    lower_bound(OptimalSearch::search(&self.data, &key))
                } else {
                    pos
                }
            }
            None => lower_bound(OptimalSearch::search(&self.data, &key)),
        };

        if self.data.get(insert_pos) == Some(&key) {
            return false;
        }
        self.data.insert(insert_pos, key);

        for segment in &mut self.segments {
            if segment.start_position >= insert_pos {
                segment.start_position += 1;
            }
            if segment.end_position >= insert_pos {
                segment.end_position += 1;
            }
        }

        let grown = &self.segments[segment_id];
        if grown.end_position - grown.start_position > 2 * grown.built_span {
            debug!(segment = segment_id, "segment span doubled, rebuilding");
            self.build_segments();
        }
        true
    }

    /// Stages the key in the owning segment's delta buffer. A full buffer is
    /// spilled into the key array and the segments refit; when everything
    /// staged across buffers exceeds 10% of the array, every buffer spills.
    pub fn insert_delta(&mut self, key: K) -> bool {
        if self.data.is_empty() || self.segments.is_empty() {
            self.data.push(key);
            self.build_segments();
            self.reset_buffers();
            return true;
        }

        let segment_id = self.find_segment_index(key);
        if segment_id >= self.delta_buffers.len() {
            self.delta_buffers
                .resize(segment_id + 1, DeltaBuffer::new(self.buffer_capacity));
        }

        match self.delta_buffers[segment_id].insert(key) {
            DeltaInsert::Duplicate => return false,
            DeltaInsert::Full => {
                debug!(segment = segment_id, "delta buffer full, merging");
                let staged = std::mem::take(&mut self.delta_buffers[segment_id].keys);
                for staged_key in staged {
                    self.insert_in_place(staged_key);
                }
                self.build_segments();
                return self.insert_in_place(key);
            }
            DeltaInsert::Inserted => {}
        }

        let staged_total: usize = self.delta_buffers.iter().map(|b| b.keys.len()).sum();
        if staged_total * 10 > self.data.len() {
            debug!(staged = staged_total, "staged keys over threshold, merging all buffers");
            let buffers = std::mem::take(&mut self.delta_buffers);
            for buffer in buffers {
                for staged_key in buffer.keys {
                    self.insert_in_place(staged_key);
                }
            }
            self.build_segments();
            self.reset_buffers();
        }
        true
    }

    /// Estimated bytes: segments, the companion index, the key array, and
    /// the delta buffers at declared capacity.
    pub fn memory_usage(&self) -> usize {
        let buffers: usize = self
            .delta_buffers
            .iter()
            .map(|b| b.keys.capacity() * std::mem::size_of::<K>() + std::mem::size_of::<usize>())
            .sum();
        std::mem::size_of::<Self>()
            + self.segments.capacity() * std::mem::size_of::<Segment<K>>()
            + self.segment_index.memory_usage()
            + self.data.capacity() * std::mem::size_of::<K>()
            + buffers
    }

    /// Index of the segment owning `key`: the one with the largest
    /// `start_key <= key`, or segment 0 for keys below the first.
    fn find_segment_index(&self, key: K) -> usize {
        let lo = SegmentKey {
            start_key: K::zero(),
            segment_id: 0,
        };
        let hi = SegmentKey {
            start_key: key,
            segment_id: usize::MAX,
        };
        self.segment_index
            .range_search(&lo, &hi)
            .last()
            .map_or(0, |entry| entry.segment_id)
    }

    fn reset_buffers(&mut self) {
        self.delta_buffers =
            vec![DeltaBuffer::new(self.buffer_capacity); self.segments.len()];
    }

    /// Refits the whole array into segments under the `epsilon` budget and
    /// rebuilds the companion index.
    fn build_segments(&mut self) {
        self.segments.clear();
        self.segment_index = BTree::new();
        if self.data.is_empty() {
            return;
        }

        let n = self.data.len();
        let epsilon = self.epsilon as f64;
        let mut start_idx = 0;

        while start_idx < n {
            // Last fit known to satisfy the budget: the lone starting point.
            let mut accepted = LinearModel::new(0.0, start_idx as f64);
            let mut accepted_error = 0.0f64;

            let mut slope = 0.0f64;
            let mut intercept = start_idx as f64;

            let x0 = widen(self.data[start_idx]);
            let mut sum_x = x0;
            let mut sum_y = start_idx as f64;
            let mut sum_xx = x0 * x0;
            let mut sum_xy = x0 * start_idx as f64;
            let mut count = 1.0f64;

            let mut end_idx = start_idx + 1;
            while end_idx < n {
                let x = widen(self.data[end_idx]);
                let y = end_idx as f64;
                count += 1.0;
                sum_x += x;
                sum_y += y;
                sum_xx += x * x;
                sum_xy += x * y;

                let denominator = count * sum_xx - sum_x * sum_x;
                if denominator.abs() > 1e-10 {
                    slope = (count * sum_xy - sum_x * sum_y) / denominator;
                    intercept = (sum_y - slope * sum_x) / count;
                }

                let mut max_residual = 0.0f64;
                for position in start_idx..=end_idx {
                    let predicted = slope * widen(self.data[position]) + intercept;
                    max_residual = max_residual.max((predicted - position as f64).abs());
                }
                if max_residual > epsilon {
                    break;
                }

                accepted = LinearModel::new(slope, intercept);
                accepted_error = max_residual;
                end_idx += 1;
            }

            let end_position = end_idx - 1;
            self.segments.push(Segment {
                start_key: self.data[start_idx],
                model: accepted,
                max_error: accepted_error.ceil() as i64,
                start_position: start_idx,
                end_position,
                built_span: end_position - start_idx,
            });
            start_idx = end_idx;
        }

        for (id, segment) in self.segments.iter().enumerate() {
            self.segment_index.insert(SegmentKey {
                start_key: segment.start_key,
                segment_id: id,
            });
        }
        debug!(
            segments = self.segments.len(),
            keys = n,
            epsilon = self.epsilon,
            "fit piecewise segments"
        );
    }
}

impl<K: Key> OrderedIndex<K> for FitingTree<K> {
    fn build(&mut self, keys: &[K]) {
        FitingTree::build(self, keys);
    }

    fn lookup(&self, key: K) -> Option<usize> {
        FitingTree::lookup(self, key)
    }

    fn range_query(&self, lo: K, hi: K) -> Vec<K> {
        FitingTree::range_query(self, lo, hi)
    }

    fn memory_usage(&self) -> usize {
        FitingTree::memory_usage(self)
    }
}

#[cfg(test)]
mod fiting_tests {
    use super::*;
    use rand::{distributions::Uniform, thread_rng, Rng};

    fn even_keys() -> Vec<u64> {
        (0..100).map(|i| i * 2).collect()
    }

    /// Segments partition the array contiguously, the companion index has
    /// one entry per segment, and every covered position respects the
    /// recorded error bound.
    fn check_invariants<K: Key>(tree: &FitingTree<K>) {
        let mut expected_start = 0;
        for (id, segment) in tree.segments().iter().enumerate() {
            let (start, end) = segment.positions();
            assert_eq!(start, expected_start, "segment {id} not contiguous");
            assert!(end >= start);
            expected_start = end + 1;

            for position in start..=end {
                let predicted = segment.model().predict(tree.keys()[position]).round();
                let residual = (predicted - position as f64).abs() as i64;
                assert!(
                    residual <= segment.max_error(),
                    "segment {id} breaks its error bound at position {position}"
                );
            }
        }
        assert_eq!(expected_start, tree.len());
    }

    #[test]
    fn linear_data_makes_one_segment() {
        let mut tree: FitingTree<u64> = FitingTree::with_epsilon(0);
        tree.build(&even_keys());

        assert_eq!(tree.segment_count(), 1);
        assert_eq!(tree.lookup(50), Some(25));
        assert_eq!(tree.lookup(51), None);
        assert_eq!(tree.range_query(10, 20), vec![10, 12, 14, 16, 18, 20]);
        check_invariants(&tree);
    }

    #[test]
    fn in_place_insert_shifts_positions() {
        let mut tree: FitingTree<u64> = FitingTree::with_epsilon(0);
        tree.build(&even_keys());

        assert!(tree.insert_in_place(51));
        assert_eq!(tree.lookup(51), Some(26));
        assert_eq!(tree.lookup(50), Some(25));
        // Everything above position 25 moved right by one. Keys behind the
        // insertion point keep the stale fit until a rebuild, so the shift
        // is observed on the array itself.
        assert_eq!(&tree.keys()[24..28], &[48, 50, 51, 52]);
        assert_eq!(tree.keys().len(), 101);
        assert_eq!(tree.segments()[0].positions(), (0, 100));
        // The same key again is rejected.
        assert!(!tree.insert_in_place(51));
    }

    #[test]
    fn span_doubling_triggers_rebuild() {
        // Sparse keys with a dense cluster poured into one segment's range:
        // once the segment's span passes twice its fitted span, the whole
        // index refits and the cluster becomes multi-segment.
        let mut tree: FitingTree<u64> = FitingTree::with_epsilon(4);
        tree.build(&(0..50u64).map(|i| i * 10).collect::<Vec<_>>());
        assert_eq!(tree.segment_count(), 1);

        let mut inserted = Vec::new();
        let mut rebuilt = false;
        for key in 101..=166u64 {
            if key % 10 == 0 {
                continue;
            }
            assert!(tree.insert_in_place(key));
            inserted.push(key);
            if tree.segment_count() > 1 {
                rebuilt = true;
                break;
            }
        }
        assert!(rebuilt, "span-doubling never triggered a rebuild");

        // The rebuild refit every key, so the whole array is visible again.
        check_invariants(&tree);
        for key in inserted {
            assert!(tree.lookup(key).is_some(), "key {key}");
        }
        for key in (0..50u64).map(|i| i * 10) {
            assert!(tree.lookup(key).is_some(), "key {key}");
        }
    }

    #[test]
    fn delta_inserts_stage_then_spill() {
        let mut tree: FitingTree<u64> = FitingTree::with_epsilon(8);
        tree.build(&(0..2_000u64).map(|i| i * 4).collect::<Vec<_>>());

        // Invisible while staged; a staged duplicate is rejected outright.
        assert!(tree.insert_delta(13));
        assert_eq!(tree.lookup(13), None);
        assert!(!tree.insert_delta(13), "staged duplicate must be rejected");

        // Fill the owning buffer to capacity, then overflow it.
        let staged: Vec<u64> = (0..63).map(|i| 17 + i * 8).collect();
        for &key in &staged {
            assert!(tree.insert_delta(key));
        }
        assert_eq!(tree.lookup(17), None);

        let trigger = 999u64;
        assert!(tree.insert_delta(trigger));
        // The spill pushed every previously staged key through a refit.
        assert_eq!(tree.lookup(13).map(|p| tree.keys()[p]), Some(13));
        for key in staged {
            assert!(tree.lookup(key).is_some(), "key {key} lost after spill");
        }
        assert!(tree.keys().contains(&trigger));
    }

    #[test]
    fn aggregate_buffers_spill_everything() {
        let mut tree: FitingTree<u64> = FitingTree::with_epsilon(8);
        tree.build(&(0..100u64).map(|i| i * 4).collect::<Vec<_>>());

        // Eleven staged keys push the aggregate over 10% of the array and
        // force the global merge.
        let staged: Vec<u64> = (0..11).map(|i| i * 8 + 1).collect();
        for &key in &staged {
            assert!(tree.insert_delta(key));
        }
        for key in staged {
            assert!(tree.lookup(key).is_some(), "key {key}");
        }
        assert_eq!(tree.len(), 111);
        check_invariants(&tree);
    }

    #[test]
    fn range_across_segments() {
        let mut rng = thread_rng();
        let mut keys: Vec<u64> = (&mut rng)
            .sample_iter(Uniform::new(0u64, 1_000_000))
            .take(5_000)
            .collect();
        keys.sort_unstable();
        keys.dedup();

        let mut tree: FitingTree<u64> = FitingTree::with_epsilon(16);
        tree.build(&keys);
        assert!(tree.segment_count() > 1);
        check_invariants(&tree);

        for _ in 0..50 {
            let a = rng.gen_range(0u64..1_000_000);
            let b = rng.gen_range(0u64..1_000_000);
            let (lo, hi) = (a.min(b), a.max(b));
            let expected: Vec<u64> =
                keys.iter().copied().filter(|k| (lo..=hi).contains(k)).collect();
            assert_eq!(tree.range_query(lo, hi), expected);
        }
        assert!(tree.range_query(10, 5).is_empty());
    }

    /// Every key must be found regardless of the residual budget.
    macro_rules! test_epsilon {
        ($name:ident, $epsilon:expr) => {
            #[test]
            fn $name() {
                let mut rng = thread_rng();
                let mut keys: Vec<u64> = (&mut rng)
                    .sample_iter(Uniform::new(0u64, 1 << 42))
                    .take(20_000)
                    .collect();
                keys.sort_unstable();
                keys.dedup();

                let mut tree: FitingTree<u64> = FitingTree::with_epsilon($epsilon);
                tree.build(&keys);
                check_invariants(&tree);

                for (pos, key) in keys.iter().enumerate() {
                    assert_eq!(tree.lookup(*key), Some(pos));
                }
                assert_eq!(tree.lookup(1), None);
            }
        };
    }
    test_epsilon!(lookup_all_eps4, 4);
    test_epsilon!(lookup_all_eps32, 32);
    test_epsilon!(lookup_all_eps256, 256);
}
