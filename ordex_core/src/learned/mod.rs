//! Learned index engines: piecewise models that approximate the location of
//! a key inside the sorted key array, searched to exactness inside an error
//! envelope.

pub mod artifact;

mod fiting;
mod radix_spline;
mod rmi;

pub use fiting::{FitingTree, Segment, DEFAULT_BUFFER_CAPACITY, DEFAULT_EPSILON};
pub use radix_spline::{RadixSpline, SearchBound, SplinePoint, DEFAULT_RADIX_BITS};
pub use rmi::Rmi;

use crate::Key;
use serde::{Deserialize, Serialize};

/// A linear position model: `position ≈ slope * key + intercept`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearModel {
    pub fn new(slope: f64, intercept: f64) -> Self {
        Self { slope, intercept }
    }

    /// Unrounded position estimate for `key`.
    pub fn predict<K: Key>(&self, key: K) -> f64 {
        self.slope * widen(key) + self.intercept
    }
}

/// Widening conversion to `f64` for model arithmetic. Lossy in the low bits
/// for keys above 2^53, which only loosens predictions, never correctness.
pub(crate) fn widen<K: Key>(key: K) -> f64 {
    num::cast::<K, f64>(key).unwrap()
}
