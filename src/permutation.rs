//! Sort-with-permutation bookkeeping.
//!
//! The estimator keeps coordinates in two orders at once: the original slice
//! order (what the caller sees) and ascending Z order (what neighbourhood
//! computations need). This module provides the sort that produces both index
//! maps plus the scatter/gather helpers that move per-slice arrays between the
//! two orders, and a view that presents a matrix in sorted order without
//! copying it.
//!
//! Conventions:
//!
//! - `permutation[i]` is the original slice id at sorted position `i`.
//! - `inverse[id]` is the sorted position of original slice `id`.

use std::cmp::Ordering;

use crate::strip::MatrixView;

/// Compare two coordinates, placing NaN after every number.
#[inline]
fn coordinate_order(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b)
        .unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()))
}

/// Sort `values` into `sorted`, writing both index maps.
///
/// Ties keep their original index order. All four slices must have the same
/// length.
pub fn sort_into(
    values: &[f64],
    sorted: &mut [f64],
    permutation: &mut [usize],
    inverse: &mut [usize],
) {
    let n = values.len();
    assert!(
        sorted.len() == n && permutation.len() == n && inverse.len() == n,
        "sort buffers must match the input length"
    );

    for (i, p) in permutation.iter_mut().enumerate() {
        *p = i;
    }
    // Stable: equal coordinates stay in slice-id order.
    permutation.sort_by(|&a, &b| coordinate_order(values[a], values[b]));

    for (position, &id) in permutation.iter().enumerate() {
        inverse[id] = position;
        sorted[position] = values[id];
    }
}

/// Result of [`sort`]: the sorted values and both index maps.
#[derive(Debug, Clone, PartialEq)]
pub struct SortedPermutation {
    pub sorted: Vec<f64>,
    pub permutation: Vec<usize>,
    pub inverse: Vec<usize>,
}

/// Allocating version of [`sort_into`].
pub fn sort(values: &[f64]) -> SortedPermutation {
    let n = values.len();
    let mut result = SortedPermutation {
        sorted: vec![0.0; n],
        permutation: vec![0; n],
        inverse: vec![0; n],
    };
    sort_into(
        values,
        &mut result.sorted,
        &mut result.permutation,
        &mut result.inverse,
    );
    result
}

/// `target[perm[i]] = source[i]`.
///
/// With `perm = permutation` this moves a sorted-order array back into slice
/// order.
pub fn scatter<T: Copy>(source: &[T], target: &mut [T], perm: &[usize]) {
    for (&value, &p) in source.iter().zip(perm) {
        target[p] = value;
    }
}

/// `target[i] = source[perm[i]]`.
///
/// With `perm = permutation` this moves a slice-order array into sorted order.
pub fn gather<T: Copy>(source: &[T], target: &mut [T], perm: &[usize]) {
    for (t, &p) in target.iter_mut().zip(perm) {
        *t = source[p];
    }
}

/// Whether `permutation` and `inverse` are mutually inverse bijections on `0..n`.
pub fn is_inverse_pair(permutation: &[usize], inverse: &[usize]) -> bool {
    permutation.len() == inverse.len()
        && permutation
            .iter()
            .enumerate()
            .all(|(i, &p)| p < inverse.len() && inverse[p] == i)
}

/// A square matrix seen through a slice permutation:
/// `view(i, j) = inner(permutation[i], permutation[j])`.
pub struct PermutedView<'a, V: MatrixView + ?Sized> {
    inner: &'a V,
    permutation: &'a [usize],
}

impl<'a, V: MatrixView + ?Sized> PermutedView<'a, V> {
    pub fn new(inner: &'a V, permutation: &'a [usize]) -> Self {
        debug_assert_eq!(inner.dim(), permutation.len());
        Self { inner, permutation }
    }
}

impl<V: MatrixView + ?Sized> MatrixView for PermutedView<'_, V> {
    fn dim(&self) -> usize {
        self.permutation.len()
    }

    #[inline]
    fn value(&self, row: usize, col: usize) -> f64 {
        self.inner
            .value(self.permutation[row], self.permutation[col])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    #[test]
    fn test_sort_produces_nondecreasing_and_inverse() {
        let values = [3.0, -1.0, 2.5, 2.5, 0.0, 10.0];
        let s = sort(&values);
        for w in s.sorted.windows(2) {
            assert!(w[0] <= w[1], "not sorted: {:?}", s.sorted);
        }
        assert!(is_inverse_pair(&s.permutation, &s.inverse));
        for (id, &v) in values.iter().enumerate() {
            assert_eq!(s.sorted[s.inverse[id]], v);
        }
        // Stable tie-break on equal coordinates
        assert_eq!(s.permutation, vec![1, 4, 2, 3, 0, 5]);
    }

    #[test]
    fn test_scatter_sorted_back_to_original() {
        let values = [0.3, 0.1, 0.9, 0.5, 0.2];
        let s = sort(&values);
        let mut restored = vec![0.0; values.len()];
        scatter(&s.sorted, &mut restored, &s.permutation);
        assert_eq!(restored, values);

        let mut resorted = vec![0.0; values.len()];
        gather(&restored, &mut resorted, &s.permutation);
        assert_eq!(resorted, s.sorted);
    }

    #[test]
    fn test_scatter_roundtrip_through_inverse() {
        let src = [10, 20, 30, 40];
        let s = sort(&[4.0, 1.0, 3.0, 2.0]);
        let mut tgt = [0; 4];
        let mut back = [0; 4];
        scatter(&src, &mut tgt, &s.permutation);
        scatter(&tgt, &mut back, &s.inverse);
        assert_eq!(back, src);
    }

    #[test]
    fn test_nan_sorts_last() {
        let s = sort(&[f64::NAN, 1.0, 0.0]);
        assert_eq!(s.permutation, vec![2, 1, 0]);
        assert!(s.sorted[2].is_nan());
    }

    #[test]
    fn test_permuted_view() {
        let m = DMatrix::<f32>::from_fn(3, 3, |r, c| (10 * r + c) as f32);
        let perm = [2, 0, 1];
        let v = PermutedView::new(&m, &perm);
        assert_eq!(v.dim(), 3);
        assert_eq!(v.value(0, 0), 22.0);
        assert_eq!(v.value(0, 1), 20.0);
        assert_eq!(v.value(1, 2), 1.0);
    }
}
