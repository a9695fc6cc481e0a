//! Band storage for similarity matrices.
//!
//! Only slice pairs within the comparison range `R` are ever compared, so the
//! N×N similarity matrix is a band matrix. [`BandStrip`] stores that band as a
//! `(2R+1) × N` array where column `z` holds rows `z−R ..= z+R` of matrix
//! column `z`:
//!
//! ```text
//! strip[(k − z + R, z)] = M[(z, k)]      for |k − z| ≤ R
//! ```
//!
//! Reading outside the band yields a fixed background value (NaN, "no data").
//!
//! [`MatrixView`] is the read-only random-access interface shared by dense
//! matrices, strips, permuted views and constant fills, so the estimator can
//! be handed any of them.

use nalgebra::{DMatrix, Scalar};

/// Read-only square matrix access in `f64`.
pub trait MatrixView {
    /// Number of rows (= columns).
    fn dim(&self) -> usize;
    /// Entry at `(row, col)`. Missing data is NaN.
    fn value(&self, row: usize, col: usize) -> f64;
}

impl<T> MatrixView for DMatrix<T>
where
    T: Scalar + Copy + Into<f64>,
{
    fn dim(&self) -> usize {
        self.nrows()
    }

    #[inline]
    fn value(&self, row: usize, col: usize) -> f64 {
        self[(row, col)].into()
    }
}

impl<V: MatrixView + ?Sized> MatrixView for &V {
    fn dim(&self) -> usize {
        (**self).dim()
    }

    #[inline]
    fn value(&self, row: usize, col: usize) -> f64 {
        (**self).value(row, col)
    }
}

/// Square matrix with every entry equal to one value.
///
/// Used as the default estimate-weight surface (all 1.0).
#[derive(Debug, Clone, Copy)]
pub struct ConstantView {
    pub dim: usize,
    pub value: f64,
}

impl MatrixView for ConstantView {
    fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    fn value(&self, _row: usize, _col: usize) -> f64 {
        self.value
    }
}

/// Band of half-width `range` around the diagonal of an N×N matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct BandStrip {
    data: DMatrix<f32>,
    range: usize,
    background: f32,
}

impl BandStrip {
    /// A strip with every in-band entry set to NaN.
    pub fn new(n: usize, range: usize) -> Self {
        Self {
            data: DMatrix::from_element(2 * range + 1, n, f32::NAN),
            range,
            background: f32::NAN,
        }
    }

    /// Copy the band of `matrix` into a new strip.
    pub fn from_matrix<V: MatrixView + ?Sized>(matrix: &V, range: usize) -> Self {
        let mut strip = Self::new(matrix.dim(), range);
        strip.copy_band_from(matrix);
        strip
    }

    /// Overwrite the band with the corresponding entries of `matrix`.
    pub fn copy_band_from<V: MatrixView + ?Sized>(&mut self, matrix: &V) {
        debug_assert_eq!(matrix.dim(), self.len());
        for z in 0..self.len() {
            for k in self.band(z) {
                self.set(z, k, matrix.value(z, k));
            }
        }
    }

    /// Number of slices N.
    pub fn len(&self) -> usize {
        self.data.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.data.ncols() == 0
    }

    /// Half-bandwidth R.
    pub fn range(&self) -> usize {
        self.range
    }

    /// Value returned for entries outside the band.
    pub fn background(&self) -> f32 {
        self.background
    }

    /// Raw `(2R+1) × N` storage.
    pub fn as_strip(&self) -> &DMatrix<f32> {
        &self.data
    }

    /// Column indices `k` of row `z` that lie inside the band (and the matrix).
    pub fn band(&self, z: usize) -> std::ops::Range<usize> {
        band_indices(z, self.range, self.len())
    }

    #[inline]
    fn slot(&self, z: usize, k: usize) -> Option<(usize, usize)> {
        let offset = k as isize - z as isize;
        if offset.unsigned_abs() > self.range || z >= self.len() || k >= self.len() {
            None
        } else {
            Some(((offset + self.range as isize) as usize, z))
        }
    }

    /// Entry `(z, k)` of the represented matrix.
    #[inline]
    pub fn get(&self, z: usize, k: usize) -> f32 {
        match self.slot(z, k) {
            Some(idx) => self.data[idx],
            None => self.background,
        }
    }

    /// Set entry `(z, k)`. Writes outside the band are dropped and reported as `false`.
    #[inline]
    pub fn set(&mut self, z: usize, k: usize, value: f64) -> bool {
        match self.slot(z, k) {
            Some(idx) => {
                self.data[idx] = value as f32;
                true
            }
            None => false,
        }
    }

    /// Expand into a dense N×N matrix, background outside the band.
    pub fn to_matrix(&self) -> DMatrix<f32> {
        let n = self.len();
        DMatrix::from_fn(n, n, |z, k| self.get(z, k))
    }
}

impl MatrixView for BandStrip {
    fn dim(&self) -> usize {
        self.len()
    }

    #[inline]
    fn value(&self, row: usize, col: usize) -> f64 {
        self.get(row, col) as f64
    }
}

/// `max(0, z − range) .. min(n, z + range + 1)`.
#[inline]
pub(crate) fn band_indices(z: usize, range: usize, n: usize) -> std::ops::Range<usize> {
    z.saturating_sub(range)..(z + range + 1).min(n)
}

/// Build an estimate-weight strip from per-slice weights:
/// entry `(z1, z2) = weights[z1] · weights[z2]` inside the band.
pub fn fill_weight_strip(weights: &[f64], range: usize) -> BandStrip {
    let mut strip = BandStrip::new(weights.len(), range);
    for (z1, &w1) in weights.iter().enumerate() {
        for z2 in band_indices(z1, range, weights.len()) {
            strip.set(z1, z2, w1 * weights[z2]);
        }
    }
    strip
}

#[cfg(test)]
mod tests {
    use super::*;

    fn banded(n: usize) -> DMatrix<f32> {
        DMatrix::from_fn(n, n, |r, c| 1.0 / (1.0 + (r as f32 - c as f32).abs()))
    }

    #[test]
    fn test_strip_layout() {
        let m = banded(6);
        let strip = BandStrip::from_matrix(&m, 2);
        assert_eq!(strip.as_strip().shape(), (5, 6));
        // column z holds M[z-R..=z+R, z]
        assert_eq!(strip.as_strip()[(2, 3)], m[(3, 3)]);
        assert_eq!(strip.as_strip()[(0, 3)], m[(3, 1)]);
        assert_eq!(strip.as_strip()[(4, 3)], m[(3, 5)]);
        // out-of-matrix slots stay NaN
        assert!(strip.as_strip()[(0, 0)].is_nan());
        assert!(strip.as_strip()[(4, 5)].is_nan());
    }

    #[test]
    fn test_strip_to_matrix_view() {
        let m = banded(7);
        let strip = BandStrip::from_matrix(&m, 2);
        let dense = strip.to_matrix();
        for z in 0..7 {
            for k in 0..7 {
                if (z as i32 - k as i32).abs() <= 2 {
                    assert_eq!(dense[(z, k)], m[(z, k)]);
                    assert_eq!(strip.value(z, k), m[(z, k)] as f64);
                } else {
                    assert!(dense[(z, k)].is_nan());
                }
            }
        }
    }

    #[test]
    fn test_write_outside_band_is_dropped() {
        let mut strip = BandStrip::new(5, 1);
        assert!(strip.set(2, 3, 0.5));
        assert!(!strip.set(0, 4, 0.5));
        assert_eq!(strip.get(2, 3), 0.5);
        assert!(strip.get(0, 4).is_nan());
    }

    #[test]
    fn test_fill_weight_strip() {
        let strip = fill_weight_strip(&[1.0, 2.0, 0.5, 1.0], 1);
        assert_eq!(strip.get(0, 0), 1.0);
        assert_eq!(strip.get(1, 2), 1.0);
        assert_eq!(strip.get(1, 1), 4.0);
        assert_eq!(strip.get(2, 3), 0.5);
        assert!(strip.get(0, 2).is_nan());
    }

    #[test]
    fn test_band_indices_clip() {
        assert_eq!(band_indices(0, 3, 10), 0..4);
        assert_eq!(band_indices(5, 3, 10), 2..9);
        assert_eq!(band_indices(9, 3, 10), 6..10);
    }
}
