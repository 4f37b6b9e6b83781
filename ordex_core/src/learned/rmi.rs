//! Two-stage recursive model index.
//!
//! Stage 1 routes a key to one of `branch_factor` stage-2 models; the chosen
//! model predicts a position, and the signed residual bounds recorded at
//! training time turn the prediction into a search envelope. Model
//! parameters come from an external artifact (see [`crate::learned::artifact`]);
//! until one is loaded the engine answers every query with a plain binary
//! search over the key array.

use crate::learned::artifact::{self, RmiParams, StageModel};
use crate::learned::LinearModel;
use crate::search::{lower_bound, upper_bound, BinarySearch, OptimalSearch, Search};
use crate::{Key, LoadError, OrderedIndex};
use std::path::Path;
use tracing::debug;

struct SubModel {
    model: LinearModel,
    min_error: i64,
    max_error: i64,
}

impl From<StageModel> for SubModel {
    fn from(record: StageModel) -> Self {
        Self {
            model: LinearModel::new(record.slope, record.intercept),
            min_error: record.min_error,
            max_error: record.max_error,
        }
    }
}

/// Two-stage RMI over a sorted key array.
#[derive(Default)]
pub struct Rmi<K: Key> {
    stage1: LinearModel,
    stage2: Vec<SubModel>,
    data: Vec<K>,
}

impl<K: Key> Rmi<K> {
    pub fn new() -> Self {
        Self {
            stage1: LinearModel::default(),
            stage2: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Number of second-stage models; zero while unloaded.
    pub fn branch_factor(&self) -> usize {
        self.stage2.len()
    }

    pub fn is_loaded(&self) -> bool {
        !self.stage2.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Replaces the indexed keys. Keys are sorted and deduplicated; the
    /// loaded model, if any, is kept.
    pub fn build(&mut self, keys: &[K]) {
        self.data = keys.to_vec();
        self.data.sort_unstable();
        self.data.dedup();
    }

    /// Loads model parameters from an artifact on disk. On failure the
    /// engine keeps its previous state; if it was never loaded, queries
    /// continue to fall back to full binary search.
    pub fn load_model(&mut self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        let params = artifact::load_params(path)?;
        self.set_params(params);
        Ok(())
    }

    /// Installs already-parsed model parameters.
    pub fn set_params(&mut self, params: RmiParams) {
        self.stage1 = params.stage1;
        self.stage2 = params.stage2.into_iter().map(SubModel::from).collect();
        debug!(branch_factor = self.stage2.len(), "installed rmi model");
    }

    /// Inclusive position envelope predicted for `key`, or `None` while the
    /// model is unloaded or no data is indexed. An empty envelope after
    /// clamping comes back as `None` too: the key cannot be present.
    pub fn predict_position(&self, key: K) -> Option<(usize, usize)> {
        if self.stage2.is_empty() || self.data.is_empty() {
            return None;
        }

        let routed = self.stage1.predict(key).round() as i64;
        let index = routed.clamp(0, self.stage2.len() as i64 - 1) as usize;
        let sub = &self.stage2[index];

        let predicted = sub.model.predict(key).round() as i64;
        let last = self.data.len() as i64 - 1;
        let lo = (predicted + sub.min_error).clamp(0, last);
        let hi = (predicted + sub.max_error).clamp(0, last);
        if hi < lo {
            return None;
        }
        Some((lo as usize, hi as usize))
    }

    pub fn lookup(&self, key: K) -> Option<usize> {
        if self.data.is_empty() {
            return None;
        }

        match self.predict_position(key) {
            Some((lo, hi)) => {
                OptimalSearch::search_with_offset(&self.data[lo..=hi], &key, lo).ok()
            }
            // Unloaded model: the whole array is the envelope.
            None if !self.is_loaded() => BinarySearch::search(&self.data, &key).ok(),
            None => None,
        }
    }

    /// All keys in `[lo, hi]`, ascending. Envelope misses fall back to a
    /// search over the full array, so a badly trained model costs time, not
    /// answers.
    pub fn range_query(&self, lo: K, hi: K) -> Vec<K> {
        if self.data.is_empty() || lo > hi {
            return Vec::new();
        }

        let start = self.locate_lower(lo);
        if start == self.data.len() {
            return Vec::new();
        }
        let end = self.locate_upper(hi, start);
        self.data[start..end].to_vec()
    }

    /// Estimated bytes: both model stages, the residual bounds, and the key
    /// array, plus fixed instance overhead.
    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.stage2.capacity() * std::mem::size_of::<SubModel>()
            + self.data.capacity() * std::mem::size_of::<K>()
    }

    /// First position whose key is `>= key`. A result pinned to either
    /// envelope edge is only trusted when the neighboring key proves it;
    /// otherwise the prediction missed and the whole array is searched.
    fn locate_lower(&self, key: K) -> usize {
        if let Some((lo, hi)) = self.predict_position(key) {
            let found = lower_bound(OptimalSearch::search_with_offset(
                &self.data[lo..=hi],
                &key,
                lo,
            ));
            let left_ok = found > lo || lo == 0 || self.data[lo - 1] < key;
            if found <= hi && left_ok {
                return found;
            }
        }
        lower_bound(BinarySearch::search(&self.data, &key))
    }

    /// First position past the last key `<= key`, never before `start`.
    fn locate_upper(&self, key: K, start: usize) -> usize {
        if let Some((lo, hi)) = self.predict_position(key) {
            let lo = lo.max(start);
            if lo <= hi {
                let found = upper_bound(OptimalSearch::search_with_offset(
                    &self.data[lo..=hi],
                    &key,
                    lo,
                ));
                let right_ok = found <= hi || found == self.data.len();
                let left_ok = found > lo || lo == 0 || self.data[lo - 1] <= key;
                if right_ok && left_ok {
                    return found;
                }
            }
        }
        start + upper_bound(BinarySearch::search(&self.data[start..], &key))
    }
}

impl<K: Key> OrderedIndex<K> for Rmi<K> {
    fn build(&mut self, keys: &[K]) {
        Rmi::build(self, keys);
    }

    fn lookup(&self, key: K) -> Option<usize> {
        Rmi::lookup(self, key)
    }

    fn range_query(&self, lo: K, hi: K) -> Vec<K> {
        Rmi::range_query(self, lo, hi)
    }

    fn memory_usage(&self) -> usize {
        Rmi::memory_usage(self)
    }
}

#[cfg(test)]
mod rmi_tests {
    use super::*;
    use crate::learned::artifact::parse_params;

    /// One exact stage-2 model over `D = [0, 10, .., 990]`.
    fn exact_model() -> RmiParams {
        RmiParams {
            branch_factor: 1,
            stage1: LinearModel::new(0.1, 0.0),
            stage2: vec![StageModel {
                slope: 0.1,
                intercept: 0.0,
                min_error: 0,
                max_error: 0,
            }],
        }
    }

    fn decade_keys() -> Vec<u64> {
        (0..100).map(|i| i * 10).collect()
    }

    #[test]
    fn exact_predictions() {
        let mut rmi: Rmi<u64> = Rmi::new();
        rmi.build(&decade_keys());
        rmi.set_params(exact_model());

        assert_eq!(rmi.lookup(250), Some(25));
        assert_eq!(rmi.lookup(255), None);
        assert_eq!(rmi.lookup(0), Some(0));
        assert_eq!(rmi.lookup(990), Some(99));
    }

    #[test]
    fn unloaded_falls_back_to_binary_search() {
        let mut rmi: Rmi<u64> = Rmi::new();
        rmi.build(&decade_keys());

        assert!(!rmi.is_loaded());
        assert_eq!(rmi.branch_factor(), 0);
        assert_eq!(rmi.lookup(250), Some(25));
        assert_eq!(rmi.lookup(1), None);
        assert_eq!(rmi.range_query(35, 70), vec![40, 50, 60, 70]);
    }

    #[test]
    fn range_queries_with_model() {
        let mut rmi: Rmi<u64> = Rmi::new();
        rmi.build(&decade_keys());
        rmi.set_params(exact_model());

        assert_eq!(rmi.range_query(35, 70), vec![40, 50, 60, 70]);
        assert_eq!(rmi.range_query(40, 40), vec![40]);
        assert_eq!(rmi.range_query(41, 41), Vec::<u64>::new());
        assert_eq!(rmi.range_query(70, 35), Vec::<u64>::new());
        // Clamped past both ends of the key domain.
        assert_eq!(rmi.range_query(0, 5_000).len(), 100);
        assert_eq!(rmi.range_query(991, 5_000), Vec::<u64>::new());
    }

    #[test]
    fn sloppy_model_still_answers() {
        // A model with wide error bounds and a badly biased router.
        let params = RmiParams {
            branch_factor: 2,
            stage1: LinearModel::new(0.0, 1.0),
            stage2: vec![
                StageModel {
                    slope: 0.0,
                    intercept: 0.0,
                    min_error: -100,
                    max_error: 100,
                },
                StageModel {
                    slope: 0.1,
                    intercept: -3.0,
                    min_error: -5,
                    max_error: 5,
                },
            ],
        };
        let mut rmi: Rmi<u64> = Rmi::new();
        rmi.build(&decade_keys());
        rmi.set_params(params);

        for (pos, key) in decade_keys().into_iter().enumerate() {
            assert_eq!(rmi.lookup(key), Some(pos), "key {key}");
        }
        assert_eq!(rmi.range_query(0, 990).len(), 100);
    }

    #[test]
    fn build_sorts_and_dedups() {
        let mut rmi: Rmi<u64> = Rmi::new();
        rmi.build(&[30, 10, 20, 10, 30]);
        assert_eq!(rmi.len(), 3);
        assert_eq!(rmi.lookup(20), Some(1));
    }

    #[test]
    fn empty_engine() {
        let rmi: Rmi<u64> = Rmi::new();
        assert!(rmi.is_empty());
        assert_eq!(rmi.lookup(5), None);
        assert!(rmi.range_query(0, 100).is_empty());
    }

    #[test]
    fn loads_model_through_artifact() {
        let text = "\
branch_factor: 1
stage1: { slope: 0.1, intercept: 0 }
stage2: [
  { slope: 0.1, intercept: 0, min_error: 0, max_error: 0 },
]
";
        let mut rmi: Rmi<u64> = Rmi::new();
        rmi.build(&decade_keys());
        rmi.set_params(parse_params(text).unwrap());
        assert!(rmi.is_loaded());
        assert_eq!(rmi.lookup(250), Some(25));
    }

    #[test]
    fn failed_load_leaves_engine_unloaded() {
        let mut rmi: Rmi<u64> = Rmi::new();
        rmi.build(&decade_keys());
        assert!(rmi.load_model("/nonexistent/rmi_model.json").is_err());
        assert!(!rmi.is_loaded());
        assert_eq!(rmi.lookup(250), Some(25));
    }
}
