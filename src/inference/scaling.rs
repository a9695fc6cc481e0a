//! Per-slice multiplicative scaling factors.
//!
//! Slices differ in contrast, noise and content, so their raw similarity rows
//! do not all follow the shared correlation fit equally well. Each slice `z`
//! gets a multiplier `s[z]` such that the scaled similarity matches the fit,
//! `s[z]·s[k]·M[z,k] ≈ F(|x_k − x_z|)`, in the least-squares sense. A dim
//! slice therefore gets a factor above 1. Rows are updated one after another
//! (Gauss-Seidel) so later rows already see the updated factors of earlier
//! ones.
//!
//! With `a = s[k]·M[z,k]` the factor is shrunk towards 1 by the regularizer
//! weight `λ`:
//!
//! ```text
//! ls   = Σ w·a·F / Σ w·a²
//! s[z] = (1 − λ) · max(ls, 0) + λ
//! ```

use crate::strip::{band_indices, BandStrip, MatrixView};

use super::fit::CorrelationFit;

/// Refine `scaling` in place against the fit.
///
/// All inputs are in sorted order. `coordinates` are the current sorted
/// coordinates, `weights` the estimate-weight surface. Rows without a single
/// usable neighbour keep their factor. Returns the number of rows that could
/// not be updated in the last pass.
#[allow(clippy::too_many_arguments)]
pub fn estimate_scaling_factors<M, W>(
    matrix: &M,
    scaling: &mut [f64],
    coordinates: &[f64],
    fit: &CorrelationFit,
    weights: &W,
    regularizer_weight: f64,
    range: usize,
    iterations: usize,
) -> usize
where
    M: MatrixView + ?Sized,
    W: MatrixView + ?Sized,
{
    let n = scaling.len();
    let lambda = regularizer_weight;
    let mut unresolved = 0;

    for _ in 0..iterations {
        unresolved = 0;
        for z in 0..n {
            let xz = coordinates[z];
            let mut numerator = 0.0;
            let mut denominator = 0.0;
            for k in band_indices(z, range, n) {
                if k == z {
                    continue;
                }
                let m = matrix.value(z, k);
                let w = weights.value(z, k);
                if !m.is_finite() || !(w > 0.0) || !w.is_finite() {
                    continue;
                }
                let f = fit.evaluate(coordinates[k] - xz);
                if !f.is_finite() {
                    continue;
                }
                let a = scaling[k] * m;
                numerator += w * a * f;
                denominator += w * a * a;
            }

            let ls = numerator / denominator;
            if denominator > 0.0 && ls.is_finite() {
                scaling[z] = (1.0 - lambda) * ls.max(0.0) + lambda;
            } else {
                unresolved += 1;
            }
        }
    }
    unresolved
}

/// Write the scaled band of `matrix` into `scaled`.
///
/// Off-diagonal entries become `M[z,k]·s[z]·s[k]`; the diagonal keeps its raw
/// self-similarity.
pub fn build_scaled_matrix<M: MatrixView + ?Sized>(
    matrix: &M,
    scaling: &[f64],
    scaled: &mut BandStrip,
) {
    for z in 0..scaled.len() {
        for k in scaled.band(z) {
            let v = matrix.value(z, k);
            let value = if k == z { v } else { v * scaling[z] * scaling[k] };
            scaled.set(z, k, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    use crate::strip::ConstantView;

    fn profile() -> CorrelationFit {
        CorrelationFit::from_values(vec![1.0, 0.8, 0.5])
    }

    fn consistent(n: usize, fit: &CorrelationFit) -> DMatrix<f64> {
        DMatrix::from_fn(n, n, |r, c| fit.at_offset(r as isize - c as isize))
    }

    #[test]
    fn test_consistent_matrix_keeps_unit_factors() {
        let n = 6;
        let fit = profile();
        let m = consistent(n, &fit);
        let coords: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let mut s = vec![1.0; n];
        let weights = ConstantView { dim: n, value: 1.0 };
        let unresolved = estimate_scaling_factors(&m, &mut s, &coords, &fit, &weights, 0.0, 2, 5);
        assert_eq!(unresolved, 0);
        for v in &s {
            assert!((v - 1.0).abs() < 1e-12, "{s:?}");
        }
    }

    #[test]
    fn test_dim_row_is_brightened() {
        let n = 5;
        let fit = profile();
        let mut m = consistent(n, &fit);
        // Slice 2 correlates at half strength with everything.
        for k in 0..n {
            if k != 2 {
                m[(2, k)] *= 0.5;
                m[(k, 2)] *= 0.5;
            }
        }
        let coords: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let mut s = vec![1.0; n];
        let weights = ConstantView { dim: n, value: 1.0 };
        estimate_scaling_factors(&m, &mut s, &coords, &fit, &weights, 0.0, 2, 20);
        assert!((s[2] - 2.0).abs() < 1e-3, "{s:?}");
        for k in [0, 1, 3, 4] {
            assert!((s[k] - 1.0).abs() < 1e-3, "{s:?}");
        }

        // The scaled row now follows the fit again.
        let mut scaled = BandStrip::new(n, 2);
        build_scaled_matrix(&m, &s, &mut scaled);
        for k in 0..n {
            let expected = fit.at_offset(k as isize - 2);
            assert!((scaled.value(2, k) - expected).abs() < 1e-3, "{k}");
        }
    }

    #[test]
    fn test_regularizer_weight_one_pins_factors() {
        let n = 4;
        let fit = profile();
        let m = DMatrix::<f64>::from_element(n, n, 0.1);
        let coords = [0.0, 1.0, 2.0, 3.0];
        let mut s = vec![1.0; n];
        let weights = ConstantView { dim: n, value: 1.0 };
        estimate_scaling_factors(&m, &mut s, &coords, &fit, &weights, 1.0, 2, 3);
        assert_eq!(s, vec![1.0; n]);
    }

    #[test]
    fn test_negative_least_squares_is_clamped() {
        let fit = profile();
        let m = DMatrix::<f64>::from_row_slice(2, 2, &[1.0, -0.8, -0.8, 1.0]);
        let coords = [0.0, 1.0];
        let mut s = vec![1.0, 1.0];
        let weights = ConstantView { dim: 2, value: 1.0 };
        estimate_scaling_factors(&m, &mut s, &coords, &fit, &weights, 0.25, 1, 1);
        assert_eq!(s, vec![0.25, 0.25]);
    }

    #[test]
    fn test_row_without_data_is_left_alone() {
        let fit = profile();
        let mut m = DMatrix::<f64>::from_element(3, 3, 0.8);
        for k in 0..3 {
            if k != 1 {
                m[(1, k)] = f64::NAN;
            }
        }
        let coords = [0.0, 1.0, 2.0];
        let mut s = vec![1.0, 0.7, 1.0];
        let weights = ConstantView { dim: 3, value: 1.0 };
        let unresolved = estimate_scaling_factors(&m, &mut s, &coords, &fit, &weights, 0.0, 1, 1);
        assert_eq!(unresolved, 1);
        assert_eq!(s[1], 0.7);
    }

    #[test]
    fn test_scaled_matrix_keeps_diagonal() {
        let m = DMatrix::<f32>::from_element(3, 3, 0.5);
        let mut scaled = BandStrip::new(3, 1);
        build_scaled_matrix(&m, &[2.0, 1.0, 3.0], &mut scaled);
        assert_eq!(scaled.get(0, 0), 0.5);
        assert_eq!(scaled.get(0, 1), 1.0);
        assert_eq!(scaled.get(2, 1), 1.5);
        assert!(scaled.get(0, 2).is_nan());
    }
}
