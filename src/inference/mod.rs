//! Iterative Z-coordinate estimation from a slice similarity matrix.
//!
//! ## Algorithm
//!
//! Starting from a guess (usually `0, 1, …, N−1`), every iteration:
//!
//! 1. Sorts the slices by their current coordinate and views the matrix in
//!    that order, so band neighbours are Z neighbours.
//! 2. Estimates the correlation fit `F(d)` from the scaled matrix
//!    ([`fit::CorrelationFit`]).
//! 3. Re-estimates per-slice scaling factors against `F` on the raw matrix
//!    and rebuilds the scaled matrix ([`scaling`]).
//! 4. Inverts `F` for every in-band pair to get a proposed position per
//!    neighbour, mediates the proposals into one shift per slice and applies
//!    them with damping ([`shifts`]).
//! 5. Repairs non-finite coordinates, optionally enforces a minimum section
//!    thickness, and pins the stack with an affine regularizer
//!    ([`regularize`]).
//!
//! The loop runs exactly `n_iterations` times; the average shift is reported
//! for monitoring only.

pub mod fit;
pub mod regularize;
pub mod scaling;
pub mod shifts;
pub mod visitor;

use std::time::Instant;

use nalgebra::DMatrix;
use tracing::{debug, info, warn};

use crate::error::{Result, ZSpacingError};
use crate::lut::LutTransform;
use crate::permutation::{gather, scatter, sort_into, PermutedView};
use crate::strip::{BandStrip, ConstantView, MatrixView};

use fit::CorrelationFit;
use regularize::{RegularizationType, Regularizer};
use scaling::{build_scaled_matrix, estimate_scaling_factors};
use shifts::{apply_shifts, collect_shifts, mediate_shifts, prevent_reorder, replace_nans};
use visitor::{IterationState, NoopVisitor, Visitor};

// ── Options ────────────────────────────────────────────────────────────────

/// Parameters of an estimation run.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Half-width `R` of the band of compared slice pairs. Default 10.
    pub comparison_range: usize,
    /// Number of outer iterations. Default 100.
    pub n_iterations: usize,
    /// Damping `β` on applied shifts: a slice moves by
    /// `shift / (1 + α + β)`. Default 0.6.
    pub shift_proportion: f64,
    /// Weight `α` of the pull towards the average shift. Default 0.0.
    pub pairwise_potential_regularizer: f64,
    /// Shrinkage `λ ∈ [0, 1]` of scaling factors towards 1. Default 0.1.
    ///
    /// A border slice only has neighbours on one side, so a stretched or
    /// compressed neighbourhood is indistinguishable from a change in
    /// brightness there, and a free factor soaks up the geometry. With
    /// strong local compression (several slices packed into one nominal
    /// step) a small `λ` lets the first slices collapse onto each other;
    /// use `λ ≥ 0.6` for such stacks.
    pub scaling_factor_regularizer_weight: f64,
    /// Gauss-Seidel passes of the scaling-factor estimator per iteration. Default 10.
    pub scaling_factor_estimation_iterations: usize,
    /// Minimum gap between consecutive coordinates when reordering is
    /// prevented. Default 0.0.
    ///
    /// The gap is enforced before regularization. An affine regularizer with
    /// slope below 1 shrinks it again, so the minimum only holds exactly with
    /// [`RegularizationType::None`].
    pub minimum_section_thickness: f64,
    /// Allow slices to swap order. When `false`, coordinates are kept
    /// non-decreasing, with `minimum_section_thickness` between them before
    /// regularization.
    ///
    /// Default: true.
    pub with_reorder: bool,
    /// Apply the regularizer selected by `regularization_type`. Default true.
    pub with_regularization: bool,
    /// Default: [`RegularizationType::Border`].
    pub regularization_type: RegularizationType,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            comparison_range: 10,
            n_iterations: 100,
            shift_proportion: 0.6,
            pairwise_potential_regularizer: 0.0,
            scaling_factor_regularizer_weight: 0.1,
            scaling_factor_estimation_iterations: 10,
            minimum_section_thickness: 0.0,
            with_reorder: true,
            with_regularization: true,
            regularization_type: RegularizationType::Border,
        }
    }
}

impl Options {
    /// Options with the given comparison range and iteration count.
    pub fn new(comparison_range: usize, n_iterations: usize) -> Self {
        Self {
            comparison_range,
            n_iterations,
            ..Default::default()
        }
    }

    /// Check every option against its admissible range.
    pub fn validate(&self) -> Result<()> {
        if self.comparison_range < 1 {
            return Err(ZSpacingError::option("comparison_range", "must be at least 1"));
        }
        if self.n_iterations < 1 {
            return Err(ZSpacingError::option("n_iterations", "must be at least 1"));
        }
        let lambda = self.scaling_factor_regularizer_weight;
        if !(0.0..=1.0).contains(&lambda) {
            return Err(ZSpacingError::option(
                "scaling_factor_regularizer_weight",
                format!("must lie in [0, 1], got {lambda}"),
            ));
        }
        let non_negative = [
            ("shift_proportion", self.shift_proportion),
            (
                "pairwise_potential_regularizer",
                self.pairwise_potential_regularizer,
            ),
            ("minimum_section_thickness", self.minimum_section_thickness),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ZSpacingError::option(
                    name,
                    format!("must be finite and non-negative, got {value}"),
                ));
            }
        }
        Ok(())
    }

    /// The regularizer this run uses for `n` slices.
    fn regularizer(&self, n: usize) -> Regularizer {
        if self.with_regularization {
            Regularizer::new(self.regularization_type, n)
        } else {
            Regularizer::None
        }
    }
}

// ── Result ─────────────────────────────────────────────────────────────────

/// Outcome of an estimation run.
#[derive(Debug, Clone)]
pub struct EstimationResult {
    /// Refined coordinates in original slice order.
    pub coordinates: Vec<f64>,
    /// Final scaling factors in original slice order.
    pub scaling_factors: Vec<f64>,
    /// Correlation fit of the last iteration.
    pub fit: CorrelationFit,
    /// Average applied shift of every iteration.
    pub average_shifts: Vec<f64>,
    /// Wall-clock time of the run, in milliseconds.
    pub elapsed_ms: f32,
}

impl EstimationResult {
    /// Average shift of the last iteration.
    pub fn last_average_shift(&self) -> f64 {
        self.average_shifts.last().copied().unwrap_or(0.0)
    }
}

// ── Estimator ──────────────────────────────────────────────────────────────

/// Fully parameterized estimation run.
///
/// ```no_run
/// use nalgebra::DMatrix;
/// use zspacing::{Options, ZSpacingEstimator, RegularizationType};
///
/// let matrix = DMatrix::<f32>::identity(8, 8);
/// let start: Vec<f64> = (0..8).map(|i| i as f64).collect();
/// let options = Options {
///     comparison_range: 3,
///     n_iterations: 20,
///     regularization_type: RegularizationType::Identity,
///     ..Default::default()
/// };
/// let result = ZSpacingEstimator::new(&matrix, &start, options)
///     .with_shift_weights(&[1.0; 8])
///     .estimate()
///     .unwrap();
/// println!("{:?}", result.coordinates);
/// ```
pub struct ZSpacingEstimator<'a> {
    matrix: &'a DMatrix<f32>,
    starting_coordinates: &'a [f64],
    options: Options,
    function_estimate: Option<&'a [f64]>,
    scaling_factors: Option<&'a [f64]>,
    estimate_weights: Option<&'a DMatrix<f64>>,
    shift_weights: Option<&'a [f64]>,
}

impl<'a> ZSpacingEstimator<'a> {
    pub fn new(matrix: &'a DMatrix<f32>, starting_coordinates: &'a [f64], options: Options) -> Self {
        Self {
            matrix,
            starting_coordinates,
            options,
            function_estimate: None,
            scaling_factors: None,
            estimate_weights: None,
            shift_weights: None,
        }
    }

    /// Use a fixed correlation fit (one-sided `R + 1` or symmetric `2R + 1`
    /// samples) instead of estimating it every iteration.
    pub fn with_function_estimate(mut self, estimate: &'a [f64]) -> Self {
        self.function_estimate = Some(estimate);
        self
    }

    /// Initial scaling factors in slice order (default all 1).
    pub fn with_scaling_factors(mut self, scaling_factors: &'a [f64]) -> Self {
        self.scaling_factors = Some(scaling_factors);
        self
    }

    /// N×N weights for the fit and scaling-factor estimation (default all 1).
    pub fn with_estimate_weights(mut self, weights: &'a DMatrix<f64>) -> Self {
        self.estimate_weights = Some(weights);
        self
    }

    /// Per-slice weights of shift proposals (default all 1).
    pub fn with_shift_weights(mut self, weights: &'a [f64]) -> Self {
        self.shift_weights = Some(weights);
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    fn validate(&self) -> Result<usize> {
        self.options.validate()?;

        let (rows, cols) = self.matrix.shape();
        if rows != cols {
            return Err(ZSpacingError::dimensions(
                "matrix",
                "a square matrix",
                format!("{rows}x{cols}"),
            ));
        }
        let n = rows;
        if n == 0 {
            return Err(ZSpacingError::dimensions("matrix", "at least 1x1", "0x0"));
        }

        let vectors = [
            ("starting coordinates", Some(self.starting_coordinates)),
            ("scaling factors", self.scaling_factors),
            ("shift weights", self.shift_weights),
        ];
        for (what, values) in vectors {
            if let Some(values) = values {
                if values.len() != n {
                    return Err(ZSpacingError::dimensions(what, n, values.len()));
                }
            }
        }
        if let Some(i) = self.starting_coordinates.iter().position(|v| !v.is_finite()) {
            return Err(ZSpacingError::IllDefinedData {
                reason: format!("starting coordinate {i} is not finite"),
            });
        }
        if let Some(w) = self.estimate_weights {
            if w.shape() != (n, n) {
                return Err(ZSpacingError::dimensions(
                    "estimate weights",
                    format!("{n}x{n}"),
                    format!("{}x{}", w.nrows(), w.ncols()),
                ));
            }
        }
        Ok(n)
    }

    /// Run the estimation.
    pub fn estimate(&self) -> Result<EstimationResult> {
        self.estimate_with_visitor(&mut NoopVisitor)
    }

    /// Run the estimation, reporting the state to `visitor` before the first
    /// and after every iteration.
    pub fn estimate_with_visitor<V: Visitor + ?Sized>(
        &self,
        visitor: &mut V,
    ) -> Result<EstimationResult> {
        let t0 = Instant::now();
        let n = self.validate()?;
        let options = &self.options;
        let range = options.comparison_range;

        info!(
            "estimating z coordinates of {} slices: range {}, {} iterations, regularization {}",
            n,
            range,
            options.n_iterations,
            if options.with_regularization {
                options.regularization_type
            } else {
                RegularizationType::None
            }
        );

        let fixed_fit = self
            .function_estimate
            .map(|estimate| CorrelationFit::from_function_estimate(estimate, range))
            .transpose()?;
        let regularizer = options.regularizer(n);

        let unit_weights = ConstantView { dim: n, value: 1.0 };
        let estimate_weights: &dyn MatrixView = match self.estimate_weights {
            Some(w) => w,
            None => &unit_weights,
        };

        // Slice-order state
        let mut lut = self.starting_coordinates.to_vec();
        let mut scaling_by_slice = self
            .scaling_factors
            .map_or_else(|| vec![1.0; n], <[f64]>::to_vec);
        let shift_weights_by_slice = self
            .shift_weights
            .map_or_else(|| vec![1.0; n], <[f64]>::to_vec);

        // Sorted-order state
        let mut permuted_lut = vec![0.0; n];
        let mut permutation = vec![0; n];
        let mut inverse = vec![0; n];
        sort_into(&lut, &mut permuted_lut, &mut permutation, &mut inverse);
        let mut scaling = vec![1.0; n];
        gather(&scaling_by_slice, &mut scaling, &permutation);
        let mut shift_weights = vec![1.0; n];

        let mut scaled = BandStrip::new(n, range);
        let mut shift_sums = vec![0.0; n];
        let mut weight_sums = vec![0.0; n];
        let mut mediated = vec![0.0; n];
        let mut average_shifts = Vec::with_capacity(options.n_iterations);
        let mut last_fit = None;

        {
            let matrix = PermutedView::new(self.matrix, &permutation);
            build_scaled_matrix(&matrix, &scaling, &mut scaled);
            visitor.act(&IterationState {
                iteration: 0,
                matrix: &matrix,
                scaled_matrix: &scaled,
                lut: &lut,
                permutation: &permutation,
                inverse: &inverse,
                scaling_factors: &scaling,
                fit: None,
                average_shift: 0.0,
            });
        }

        for iteration in 0..options.n_iterations {
            let t_iter = Instant::now();
            let matrix = PermutedView::new(self.matrix, &permutation);
            let weights = PermutedView::new(estimate_weights, &permutation);

            build_scaled_matrix(&matrix, &scaling, &mut scaled);
            let fit = match &fixed_fit {
                Some(fit) => fit.clone(),
                None => CorrelationFit::estimate(
                    &scaled,
                    &LutTransform::new(&permuted_lut),
                    &weights,
                    range,
                ),
            };

            let unresolved = estimate_scaling_factors(
                &matrix,
                &mut scaling,
                &permuted_lut,
                &fit,
                &weights,
                options.scaling_factor_regularizer_weight,
                range,
                options.scaling_factor_estimation_iterations,
            );
            if unresolved > 0 && iteration == 0 {
                warn!("{unresolved} slices have no usable neighbours for scaling estimation");
            }
            build_scaled_matrix(&matrix, &scaling, &mut scaled);

            gather(&shift_weights_by_slice, &mut shift_weights, &permutation);
            shift_sums.fill(0.0);
            weight_sums.fill(0.0);
            let votes = collect_shifts(
                &permuted_lut,
                &scaled,
                &fit,
                &shift_weights,
                range,
                &mut shift_sums,
                &mut weight_sums,
            );
            mediate_shifts(&shift_sums, &weight_sums, &mut mediated);
            let average_shift = apply_shifts(
                &mut permuted_lut,
                &mut mediated,
                options.pairwise_potential_regularizer,
                options.shift_proportion,
            );

            if !replace_nans(&mut permuted_lut) {
                return Err(ZSpacingError::NumericalBreakdown { iteration });
            }
            if !options.with_reorder {
                prevent_reorder(&mut permuted_lut, options.minimum_section_thickness);
            }
            if let Err(e) = regularizer.regularize(&mut permuted_lut) {
                warn!("{} regularization failed in iteration {iteration}: {e}", regularizer.kind());
                return Err(e);
            }

            // Back to slice order, then re-sort for the next iteration.
            scatter(&permuted_lut, &mut lut, &permutation);
            scatter(&scaling, &mut scaling_by_slice, &permutation);
            sort_into(&lut, &mut permuted_lut, &mut permutation, &mut inverse);
            gather(&scaling_by_slice, &mut scaling, &permutation);

            debug!(
                "iteration {}: avg shift {:.4e}, {} votes, fit length {}, {:.2} ms",
                iteration + 1,
                average_shift,
                votes,
                fit.values().len(),
                t_iter.elapsed().as_secs_f32() * 1000.0
            );
            average_shifts.push(average_shift);

            let matrix = PermutedView::new(self.matrix, &permutation);
            visitor.act(&IterationState {
                iteration: iteration + 1,
                matrix: &matrix,
                scaled_matrix: &scaled,
                lut: &lut,
                permutation: &permutation,
                inverse: &inverse,
                scaling_factors: &scaling,
                fit: Some(&fit),
                average_shift,
            });
            last_fit = Some(fit);
        }

        let elapsed_ms = t0.elapsed().as_secs_f32() * 1000.0;
        info!(
            "z estimation finished in {:.1} ms, last avg shift {:.4e}",
            elapsed_ms,
            average_shifts.last().copied().unwrap_or(0.0)
        );

        Ok(EstimationResult {
            coordinates: lut,
            scaling_factors: scaling_by_slice,
            fit: last_fit.unwrap_or_else(|| CorrelationFit::from_values(Vec::new())),
            average_shifts,
            elapsed_ms,
        })
    }
}

/// Estimate refined Z coordinates with default weights and no visitor.
///
/// `matrix` is the N×N slice similarity matrix (NaN = no data) and
/// `starting_coordinates` the initial guess, one entry per slice. Returns the
/// refined coordinates in slice order.
pub fn estimate_z_coordinates(
    matrix: &DMatrix<f32>,
    starting_coordinates: &[f64],
    options: &Options,
) -> Result<Vec<f64>> {
    ZSpacingEstimator::new(matrix, starting_coordinates, options.clone())
        .estimate()
        .map(|result| result.coordinates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_start(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    #[test]
    fn test_default_options_are_valid() {
        let options = Options::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.comparison_range, 10);
        assert_eq!(options.regularization_type, RegularizationType::Border);
    }

    #[test]
    fn test_invalid_options() {
        let cases = [
            (Options { comparison_range: 0, ..Default::default() }, "comparison_range"),
            (Options { n_iterations: 0, ..Default::default() }, "n_iterations"),
            (
                Options { scaling_factor_regularizer_weight: 1.5, ..Default::default() },
                "scaling_factor_regularizer_weight",
            ),
            (
                Options { minimum_section_thickness: -0.1, ..Default::default() },
                "minimum_section_thickness",
            ),
            (
                Options { shift_proportion: f64::NAN, ..Default::default() },
                "shift_proportion",
            ),
        ];
        for (options, expected) in cases {
            match options.validate() {
                Err(ZSpacingError::InvalidOptions { name, .. }) => assert_eq!(name, expected),
                other => panic!("expected InvalidOptions for {expected}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_dimension_checks() {
        let m = DMatrix::<f32>::identity(4, 3);
        let start = identity_start(4);
        assert!(matches!(
            estimate_z_coordinates(&m, &start, &Options::new(2, 1)),
            Err(ZSpacingError::InvalidDimensions { what: "matrix", .. })
        ));

        let m = DMatrix::<f32>::identity(4, 4);
        assert!(matches!(
            estimate_z_coordinates(&m, &start[..3], &Options::new(2, 1)),
            Err(ZSpacingError::InvalidDimensions { what: "starting coordinates", .. })
        ));

        let weights = DMatrix::<f64>::from_element(3, 3, 1.0);
        let result = ZSpacingEstimator::new(&m, &start, Options::new(2, 1))
            .with_estimate_weights(&weights)
            .estimate();
        assert!(matches!(
            result,
            Err(ZSpacingError::InvalidDimensions { what: "estimate weights", .. })
        ));

        let result = ZSpacingEstimator::new(&m, &start, Options::new(2, 1))
            .with_shift_weights(&[1.0; 5])
            .estimate();
        assert!(matches!(
            result,
            Err(ZSpacingError::InvalidDimensions { what: "shift weights", .. })
        ));
    }

    #[test]
    fn test_non_finite_start_is_rejected() {
        let m = DMatrix::<f32>::identity(3, 3);
        assert!(matches!(
            estimate_z_coordinates(&m, &[0.0, f64::NAN, 2.0], &Options::new(1, 1)),
            Err(ZSpacingError::IllDefinedData { .. })
        ));
    }

    #[test]
    fn test_visitor_called_every_iteration() {
        let n = 6;
        let m = DMatrix::<f32>::from_fn(n, n, |r, c| {
            let d = (r as f32 - c as f32).abs();
            if d <= 2.0 {
                1.0 - 0.3 * d
            } else {
                f32::NAN
            }
        });
        let start = identity_start(n);
        let mut seen = Vec::new();
        let mut visitor = |state: &IterationState<'_>| {
            seen.push((state.iteration, state.fit.is_some()));
        };
        let result = ZSpacingEstimator::new(&m, &start, Options::new(2, 3))
            .estimate_with_visitor(&mut visitor)
            .unwrap();
        assert_eq!(seen, vec![(0, false), (1, true), (2, true), (3, true)]);
        assert_eq!(result.average_shifts.len(), 3);
        assert_eq!(result.fit.values().len(), 3);
    }

    #[test]
    fn test_fixed_function_estimate_is_used() {
        let n = 5;
        let m = DMatrix::<f32>::from_fn(n, n, |r, c| if r == c { 1.0 } else { 0.5 });
        let start = identity_start(n);
        let estimate = [1.0, 0.75, 0.5];
        let result = ZSpacingEstimator::new(&m, &start, Options::new(2, 2))
            .with_function_estimate(&estimate)
            .estimate()
            .unwrap();
        assert_eq!(result.fit.values(), &estimate);

        let wrong = [1.0, 0.5];
        assert!(ZSpacingEstimator::new(&m, &start, Options::new(2, 2))
            .with_function_estimate(&wrong)
            .estimate()
            .is_err());
    }
}
