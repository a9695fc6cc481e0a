//! Correlation fit: expected similarity as a function of axial distance.
//!
//! The fit is a single profile shared by all slices, sampled at integer
//! distances `0..=L` (`L ≤ R`) and evaluated symmetrically and piecewise
//! linearly in between. It is estimated from the scaled similarity matrix by
//! binning every in-band pair at its current real distance
//! `δ = |x_k − x_z|`, splitting each contribution linearly between the two
//! neighbouring integer bins:
//!
//! ```text
//! F(d) = Σ w·(1 − |δ − d|)·v  /  Σ w·(1 − |δ − d|)      over pairs with |δ − d| < 1
//! ```
//!
//! Inverting the fit (similarity → distance) is what turns a matrix entry into
//! a proposed coordinate shift; see [`FitInverse`].

use tracing::trace;

use crate::error::{Result, ZSpacingError};
use crate::lut::LutTransform;
use crate::strip::{band_indices, MatrixView};

use super::shifts::interpolate_missing;

/// Similarity profile over non-negative integer offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationFit {
    /// `values[d] = F(d)`; every entry finite.
    values: Vec<f64>,
}

impl CorrelationFit {
    /// Build a fit from one-sided samples `F(0), F(1), …`.
    ///
    /// Interior non-finite samples are linearly interpolated, trailing ones are
    /// dropped.
    pub fn from_values(mut values: Vec<f64>) -> Self {
        let defined = values
            .iter()
            .rposition(|v| v.is_finite())
            .map_or(0, |last| last + 1);
        values.truncate(defined);
        interpolate_missing(&mut values);
        Self { values }
    }

    /// Interpret a caller-supplied function estimate.
    ///
    /// Accepts either the one-sided profile (`R + 1` samples, offset 0 first)
    /// or the symmetric profile (`2R + 1` samples centred on offset 0).
    pub fn from_function_estimate(estimate: &[f64], range: usize) -> Result<Self> {
        if estimate.len() == range + 1 {
            Ok(Self::from_values(estimate.to_vec()))
        } else if estimate.len() == 2 * range + 1 {
            Ok(Self::from_values(estimate[range..].to_vec()))
        } else {
            Err(ZSpacingError::dimensions(
                "function estimate",
                format!("{} or {}", range + 1, 2 * range + 1),
                estimate.len(),
            ))
        }
    }

    /// Estimate the profile from a (scaled) similarity matrix in sorted order.
    ///
    /// `transform` maps sorted slice positions to their current coordinates;
    /// `weights` is the estimate-weight surface in the same order. Pairs further
    /// apart than `range` (in index or in coordinate) are ignored.
    pub fn estimate<S, W>(
        scaled: &S,
        transform: &LutTransform<'_>,
        weights: &W,
        range: usize,
    ) -> Self
    where
        S: MatrixView + ?Sized,
        W: MatrixView + ?Sized,
    {
        let n = scaled.dim();
        let mut sums = vec![0.0; range + 1];
        let mut weight_sums = vec![0.0; range + 1];

        for z in 0..n {
            let xz = transform.apply(z as f64);
            for k in band_indices(z, range, n) {
                let v = scaled.value(z, k);
                let w = weights.value(z, k);
                if !v.is_finite() || !(w > 0.0) || !w.is_finite() {
                    continue;
                }
                let distance = (transform.apply(k as f64) - xz).abs();
                if !(distance <= range as f64) {
                    continue;
                }
                let lower = distance.floor();
                let frac = distance - lower;
                let bin = lower as usize;

                let w_lower = w * (1.0 - frac);
                sums[bin] += w_lower * v;
                weight_sums[bin] += w_lower;
                if frac > 0.0 && bin < range {
                    let w_upper = w * frac;
                    sums[bin + 1] += w_upper * v;
                    weight_sums[bin + 1] += w_upper;
                }
            }
        }

        let values = sums
            .iter()
            .zip(&weight_sums)
            .map(|(&s, &w)| if w > 0.0 { s / w } else { f64::NAN })
            .collect();
        let fit = Self::from_values(values);
        trace!("correlation fit: {:?}", fit.values);
        fit
    }

    /// One-sided samples `F(0) ..= F(L)`.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Largest offset `L` with a sample, if any.
    pub fn max_offset(&self) -> Option<usize> {
        self.values.len().checked_sub(1)
    }

    /// `F(d)` at an integer offset in `[−L, L]`, NaN outside.
    pub fn at_offset(&self, offset: isize) -> f64 {
        self.values
            .get(offset.unsigned_abs())
            .copied()
            .unwrap_or(f64::NAN)
    }

    /// The profile over offsets `−L ..= L`.
    pub fn symmetric(&self) -> Vec<f64> {
        self.values
            .iter()
            .rev()
            .chain(self.values.iter().skip(1))
            .copied()
            .collect()
    }

    /// `F(|distance|)` by linear interpolation; NaN beyond `L`.
    pub fn evaluate(&self, distance: f64) -> f64 {
        if self.values.is_empty() {
            return f64::NAN;
        }
        let y = LutTransform::new(&self.values).apply(distance.abs());
        if y.is_finite() {
            y
        } else {
            f64::NAN
        }
    }

    /// Monotone inverse of the profile, or `None` with fewer than two samples.
    pub fn inverse(&self) -> Option<FitInverse> {
        if self.values.len() < 2 {
            return None;
        }
        // Running minimum makes the profile non-increasing; negating it gives
        // the non-decreasing table the LUT inverse needs.
        let mut floor = f64::INFINITY;
        let table = self
            .values
            .iter()
            .map(|&v| {
                floor = floor.min(v);
                -floor
            })
            .collect();
        Some(FitInverse { table })
    }
}

/// Similarity → distance lookup built from a [`CorrelationFit`].
#[derive(Debug, Clone)]
pub struct FitInverse {
    table: Vec<f64>,
}

impl FitInverse {
    /// Distance at which the fit predicts `similarity`.
    ///
    /// Similarities above `F(0)` map to distance 0. Similarities below the
    /// smallest sampled value carry no usable distance and return `None`.
    pub fn distance(&self, similarity: f64) -> Option<f64> {
        if !similarity.is_finite() {
            return None;
        }
        let transform = LutTransform::new(&self.table);
        let y = -similarity;
        if y < transform.min_transformed_coordinate() {
            return Some(0.0);
        }
        let d = transform.apply_inverse(y);
        d.is_finite().then_some(d)
    }

    /// Largest distance the inverse can report.
    pub fn max_distance(&self) -> f64 {
        (self.table.len() - 1) as f64
    }
}
