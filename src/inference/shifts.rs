//! Shift proposals and their application to the coordinate vector.
//!
//! Every in-band neighbour `k` of slice `z` votes for a new position of `z`:
//! the fit inverse turns the scaled similarity `S[z,k]` into a distance `d`,
//! and `z` should then sit at `x_k − d` (neighbour above) or `x_k + d`
//! (neighbour below). Votes are accumulated as weighted sums, mediated into
//! one shift per slice, repaired where no vote was cast, and finally applied
//! with damping:
//!
//! ```text
//! x_i += (shift_i + α · mean(shift)) / (1 + α + β)
//! ```

use crate::strip::{band_indices, MatrixView};

use super::fit::CorrelationFit;

/// Accumulate weighted shift proposals for every slice.
///
/// `coordinates`, `scaled` and `shift_weights` are in sorted order.
/// `shifts[z]` receives `Σ w·Δ` and `weight_sums[z]` receives `Σ w`; both are
/// added to, not overwritten. Returns the number of pairs that voted.
pub fn collect_shifts<S: MatrixView + ?Sized>(
    coordinates: &[f64],
    scaled: &S,
    fit: &CorrelationFit,
    shift_weights: &[f64],
    range: usize,
    shifts: &mut [f64],
    weight_sums: &mut [f64],
) -> usize {
    let Some(inverse) = fit.inverse() else {
        return 0;
    };
    let n = coordinates.len();
    let mut votes = 0;

    for z in 0..n {
        let xz = coordinates[z];
        for k in band_indices(z, range, n) {
            if k == z {
                continue;
            }
            let w = shift_weights[z] * shift_weights[k];
            if !(w > 0.0) || !w.is_finite() {
                continue;
            }
            let Some(distance) = inverse.distance(scaled.value(z, k)) else {
                continue;
            };
            let target = if k > z {
                coordinates[k] - distance
            } else {
                coordinates[k] + distance
            };
            let shift = target - xz;
            if !shift.is_finite() {
                continue;
            }
            shifts[z] += w * shift;
            weight_sums[z] += w;
            votes += 1;
        }
    }
    votes
}

/// `mediated[i] = shifts[i] / weight_sums[i]`, NaN where nothing voted.
pub fn mediate_shifts(shifts: &[f64], weight_sums: &[f64], mediated: &mut [f64]) {
    for ((m, &s), &w) in mediated.iter_mut().zip(shifts).zip(weight_sums) {
        *m = if w != 0.0 { s / w } else { f64::NAN };
    }
}

/// Replace the non-finite entry at `i` by interpolating its nearest finite
/// neighbours.
///
/// Both neighbours present: weighted by proximity. One present: copied.
/// None present: left unchanged. Returns the value written.
pub fn interpolate_shift(values: &mut [f64], i: usize) -> f64 {
    let lower = values[..i]
        .iter()
        .rposition(|v| v.is_finite())
        .map(|j| (j, values[j]));
    let upper = values[i + 1..]
        .iter()
        .position(|v| v.is_finite())
        .map(|j| (i + 1 + j, values[i + 1 + j]));

    let value = match (lower, upper) {
        (Some((lo, lv)), Some((hi, hv))) => {
            let w_lower = (hi - i) as f64;
            let w_upper = (i - lo) as f64;
            (w_lower * lv + w_upper * hv) / (w_lower + w_upper)
        }
        (Some((_, lv)), None) => lv,
        (None, Some((_, hv))) => hv,
        (None, None) => values[i],
    };
    values[i] = value;
    value
}

/// Interpolate every non-finite entry in ascending order.
///
/// `[NaN, NaN, 2, NaN, 4, NaN]` becomes `[2, 2, 2, 3, 4, 4]`.
pub fn interpolate_missing(values: &mut [f64]) {
    for i in 0..values.len() {
        if !values[i].is_finite() {
            interpolate_shift(values, i);
        }
    }
}

/// Apply mediated shifts to `coordinates` and return the average shift.
///
/// Non-finite shifts are interpolated in place first. The average runs over
/// the shifts that were finite on entry; with fewer than two of those the
/// coordinates are left untouched. With none at all the average is 0.
pub fn apply_shifts(
    coordinates: &mut [f64],
    shifts: &mut [f64],
    pairwise_potential_regularizer: f64,
    shift_proportion: f64,
) -> f64 {
    let mut sum = 0.0;
    let mut contributors = 0usize;
    for i in 0..shifts.len() {
        let shift = shifts[i];
        if shift.is_finite() {
            sum += shift;
            contributors += 1;
        } else {
            interpolate_shift(shifts, i);
        }
    }

    if contributors == 0 {
        return 0.0;
    }
    let average_shift = sum / contributors as f64;
    if contributors < 2 {
        return average_shift;
    }

    // Per-coordinate confidence is uniform.
    let w = 1.0;
    let alpha = pairwise_potential_regularizer;
    let denominator = w + alpha + shift_proportion;
    for (x, &shift) in coordinates.iter_mut().zip(shifts.iter()) {
        *x += (w * shift + alpha * average_shift) / denominator;
    }
    average_shift
}

/// Replace non-finite entries by the nearest finite value (ties go to the
/// lower index). Returns `false` if there was no finite value to copy.
pub fn replace_nans(values: &mut [f64]) -> bool {
    let n = values.len();
    if values.iter().all(|v| v.is_finite()) {
        return true;
    }
    let finite: Vec<usize> = (0..n).filter(|&i| values[i].is_finite()).collect();
    if finite.is_empty() {
        return false;
    }
    for i in 0..n {
        if values[i].is_finite() {
            continue;
        }
        // First finite index at or after i; the candidate before it is the lower neighbour.
        let after = finite.partition_point(|&j| j < i);
        let nearest = match (after.checked_sub(1).map(|a| finite[a]), finite.get(after)) {
            (Some(lo), Some(&hi)) => {
                if i - lo <= hi - i {
                    lo
                } else {
                    hi
                }
            }
            (Some(lo), None) => lo,
            (None, Some(&hi)) => hi,
            (None, None) => unreachable!("finite indices are non-empty"),
        };
        values[i] = values[nearest];
    }
    true
}

/// Enforce `x[i] ≥ x[i−1] + minimum_thickness` by pushing entries upward.
pub fn prevent_reorder(coordinates: &mut [f64], minimum_thickness: f64) {
    for i in 1..coordinates.len() {
        let floor = coordinates[i - 1] + minimum_thickness;
        if coordinates[i] < floor {
            coordinates[i] = floor;
        }
    }
}
