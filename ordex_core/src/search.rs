//! Bounded search primitives shared by every engine.
//!
//! The learned engines narrow a query to a small window of positions and
//! finish with a search inside it; which algorithm wins depends on the
//! window size, so the strategy is abstracted behind [`Search`].

use std::borrow::Borrow;

/// First index whose element is `>= key`: `Ok` means the key was found at
/// that index, `Err` carries the insertion point.
pub fn lower_bound(search: Result<usize, usize>) -> usize {
    match search {
        Ok(index) => index,
        Err(index) => index,
    }
}

/// First index whose element is `> key`, assuming the searched slice holds
/// no duplicates.
pub fn upper_bound(search: Result<usize, usize>) -> usize {
    match search {
        Ok(index) => index + 1,
        Err(index) => index,
    }
}

/// Some algorithm for searching a sorted slice, e.g. binary or linear.
pub trait Search {
    /// Same as calling `search_by_key` when `T` == `K`.
    fn search<T: Ord + Copy>(slice: &[T], x: &T) -> Result<usize, usize> {
        Self::search_by_key(slice, x)
    }

    /// If the value is found in the slice, returns `Ok(index)`. Otherwise
    /// returns `Err(index)` with the index where the value would be inserted
    /// to keep the slice sorted.
    ///
    /// Assumes the slice is sorted and free of duplicates.
    fn search_by_key<K: Ord + Copy, T: Borrow<K>>(slice: &[T], x: &K) -> Result<usize, usize>;

    /// Same as `search`, but shifts the result when the slice's index 0 sits
    /// at `offset` inside some larger slice.
    fn search_with_offset<T: Ord + Copy>(
        slice: &[T],
        x: &T,
        offset: usize,
    ) -> Result<usize, usize> {
        Self::search_by_key(slice, x)
            .map(|i| i + offset)
            .map_err(|i| i + offset)
    }

    /// Same as `search_by_key`, shifted by `offset`.
    fn search_by_key_with_offset<K: Ord + Copy, T: Borrow<K>>(
        slice: &[T],
        x: &K,
        offset: usize,
    ) -> Result<usize, usize> {
        Self::search_by_key(slice, x)
            .map(|i| i + offset)
            .map_err(|i| i + offset)
    }
}

/// Binary search, `O(log n)`.
pub struct BinarySearch;

impl Search for BinarySearch {
    fn search_by_key<K: Ord + Copy, T: Borrow<K>>(slice: &[T], x: &K) -> Result<usize, usize> {
        slice.binary_search_by_key(x, |t| *t.borrow())
    }
}

/// Linear scan, `O(n)`; beats binary search on the short windows the error
/// envelopes produce.
pub struct LinearSearch;

impl Search for LinearSearch {
    fn search_by_key<K: Ord + Copy, T: Borrow<K>>(slice: &[T], x: &K) -> Result<usize, usize> {
        let mut index = 0;

        while index < slice.len() && slice[index].borrow() < x {
            index += 1;
        }

        if index >= slice.len() {
            Err(slice.len())
        } else if slice[index].borrow() == x {
            Ok(index)
        } else {
            Err(index)
        }
    }
}

/// If a slice has fewer than `LINEAR_SEARCH_THRESHOLD` bytes, scan it
const LINEAR_SEARCH_THRESHOLD: usize = 8 * 64;

/// Picks linear or binary search from the byte size of the slice.
pub struct OptimalSearch;

impl Search for OptimalSearch {
    fn search_by_key<K: Ord + Copy, T: Borrow<K>>(slice: &[T], x: &K) -> Result<usize, usize> {
        if slice.len() * std::mem::size_of::<T>() > LINEAR_SEARCH_THRESHOLD {
            BinarySearch::search_by_key(slice, x)
        } else {
            LinearSearch::search_by_key(slice, x)
        }
    }
}

#[cfg(test)]
mod search_tests {
    use super::*;

    #[test]
    fn bound_helpers() {
        assert_eq!(lower_bound(Ok(3)), 3);
        assert_eq!(lower_bound(Err(3)), 3);
        assert_eq!(upper_bound(Ok(3)), 4);
        assert_eq!(upper_bound(Err(3)), 3);
    }

    #[test]
    fn bounds_against_std() {
        let array = [1u64, 2, 3, 4, 7, 10, 24, 55, 56, 57, 100];
        for x in 0u64..110 {
            let lb = lower_bound(BinarySearch::search(&array[..], &x));
            let ub = upper_bound(BinarySearch::search(&array[..], &x));
            assert_eq!(lb, array.partition_point(|&k| k < x));
            assert_eq!(ub, array.partition_point(|&k| k <= x));
        }
    }

    #[test]
    fn linear_matches_binary() {
        let array = [1u64, 2, 3, 4, 7, 10, 24, 55, 56, 57, 100];
        for x in 0u64..110 {
            assert_eq!(
                BinarySearch::search(&array[..], &x),
                LinearSearch::search(&array[..], &x)
            );
        }
    }

    #[test]
    fn optimal_matches_binary() {
        let array = [1u64, 2, 3, 4, 7, 10, 24, 55, 56, 57, 100];
        for x in 0u64..110 {
            assert_eq!(
                BinarySearch::search(&array[..], &x),
                OptimalSearch::search(&array[..], &x)
            );
        }
    }

    #[test]
    fn offset_search() {
        let array = [10u64, 20, 30, 40, 50];
        assert_eq!(
            OptimalSearch::search_with_offset(&array[1..4], &30, 1),
            Ok(2)
        );
        assert_eq!(
            OptimalSearch::search_with_offset(&array[1..4], &35, 1),
            Err(3)
        );
    }
}
