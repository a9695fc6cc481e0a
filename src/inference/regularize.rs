//! Regularization of the coordinate vector after each iteration.
//!
//! Shifts only ever see relative distances, so left alone the whole stack can
//! drift or breathe. The regularizer fits an affine map `y = slope·x + offset`
//! from the current sorted coordinates onto a reference and applies it to
//! every coordinate:
//!
//! - `None`: nothing.
//! - `Identity`: all coordinates onto `0, 1, …, N−1`.
//! - `Border`: first and last coordinate onto `0` and `N−1`.

use nalgebra::{Matrix2, Vector2};

use crate::error::{Result, ZSpacingError};

/// Which reference the coordinates are pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegularizationType {
    None,
    Identity,
    #[default]
    Border,
}

impl std::fmt::Display for RegularizationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegularizationType::None => write!(f, "none"),
            RegularizationType::Identity => write!(f, "identity"),
            RegularizationType::Border => write!(f, "border"),
        }
    }
}

impl std::str::FromStr for RegularizationType {
    type Err = ZSpacingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(RegularizationType::None),
            "identity" => Ok(RegularizationType::Identity),
            "border" => Ok(RegularizationType::Border),
            other => Err(ZSpacingError::option(
                "regularization_type",
                format!("unknown type {other:?} (expected none, identity or border)"),
            )),
        }
    }
}

/// `y = slope · x + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineModel1D {
    pub slope: f64,
    pub offset: f64,
}

impl AffineModel1D {
    pub const IDENTITY: Self = Self {
        slope: 1.0,
        offset: 0.0,
    };

    /// Weighted least-squares fit of `ys ≈ slope · xs + offset`.
    ///
    /// Points with a non-finite coordinate or non-positive weight are ignored.
    /// Fails with [`ZSpacingError::InsufficientData`] below two usable points
    /// and [`ZSpacingError::IllDefinedData`] when the usable `xs` coincide.
    pub fn fit(xs: &[f64], ys: &[f64], weights: &[f64]) -> Result<Self> {
        let points = move || {
            xs.iter()
                .zip(ys)
                .zip(weights)
                .filter(|&((x, y), w)| x.is_finite() && y.is_finite() && *w > 0.0 && w.is_finite())
                .map(|((&x, &y), &w)| (x, y, w))
        };

        let available = points().count();
        if available < 2 {
            return Err(ZSpacingError::InsufficientData { available });
        }

        // Centre on the weighted mean of xs to keep the normal equations well conditioned.
        let (sw, swx, swxx) = points().fold((0.0, 0.0, 0.0), |(sw, swx, swxx), (x, _, w)| {
            (sw + w, swx + w * x, swxx + w * x * x)
        });
        let x_mean = swx / sw;

        let mut ata = Matrix2::<f64>::zeros();
        let mut atb = Vector2::<f64>::zeros();
        for (x, y, w) in points() {
            let dx = x - x_mean;
            ata[(0, 0)] += w * dx * dx;
            ata[(0, 1)] += w * dx;
            ata[(1, 1)] += w;
            atb[0] += w * dx * y;
            atb[1] += w * y;
        }
        ata[(1, 0)] = ata[(0, 1)];

        // Spread of xs at rounding level means every x is the same point.
        if !(ata[(0, 0)] > 16.0 * f64::EPSILON * swxx) {
            return Err(ZSpacingError::IllDefinedData {
                reason: format!("all {available} source coordinates coincide"),
            });
        }
        let solution = ata
            .lu()
            .solve(&atb)
            .ok_or_else(|| ZSpacingError::IllDefinedData {
                reason: "singular normal equations".to_string(),
            })?;

        let slope = solution[0];
        Ok(Self {
            slope,
            offset: solution[1] - slope * x_mean,
        })
    }

    #[inline]
    pub fn apply(&self, x: f64) -> f64 {
        self.slope * x + self.offset
    }

    pub fn apply_in_place(&self, values: &mut [f64]) {
        for v in values.iter_mut() {
            *v = self.apply(*v);
        }
    }
}

/// Regularizer bound to a stack size.
#[derive(Debug, Clone, PartialEq)]
pub enum Regularizer {
    None,
    /// Fit every coordinate onto its index.
    Identity { reference: Vec<f64> },
    /// Fit the two end coordinates onto `0` and `N − 1`.
    Border { last: f64 },
}

impl Regularizer {
    pub fn new(kind: RegularizationType, n: usize) -> Self {
        match kind {
            RegularizationType::None => Regularizer::None,
            RegularizationType::Identity => Regularizer::Identity {
                reference: (0..n).map(|i| i as f64).collect(),
            },
            RegularizationType::Border => Regularizer::Border {
                last: n.saturating_sub(1) as f64,
            },
        }
    }

    pub fn kind(&self) -> RegularizationType {
        match self {
            Regularizer::None => RegularizationType::None,
            Regularizer::Identity { .. } => RegularizationType::Identity,
            Regularizer::Border { .. } => RegularizationType::Border,
        }
    }

    /// Fit the model for `coordinates` (sorted order) and apply it in place.
    ///
    /// Returns the applied model; on error the coordinates are untouched.
    pub fn regularize(&self, coordinates: &mut [f64]) -> Result<AffineModel1D> {
        let model = match self {
            Regularizer::None => return Ok(AffineModel1D::IDENTITY),
            Regularizer::Identity { reference } => {
                let weights = vec![1.0; coordinates.len()];
                AffineModel1D::fit(coordinates, reference, &weights)?
            }
            Regularizer::Border { last } => {
                let (Some(&first_x), Some(&last_x)) = (coordinates.first(), coordinates.last())
                else {
                    return Err(ZSpacingError::InsufficientData { available: 0 });
                };
                if coordinates.len() < 2 {
                    return Err(ZSpacingError::InsufficientData { available: 1 });
                }
                AffineModel1D::fit(&[first_x, last_x], &[0.0, *last], &[1.0, 1.0])?
            }
        };
        model.apply_in_place(coordinates);
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affine_fit_exact() {
        let xs = [1.0, 2.0, 4.0, 7.0];
        let ys: Vec<f64> = xs.iter().map(|x| 3.0 * x - 2.0).collect();
        let m = AffineModel1D::fit(&xs, &ys, &[1.0; 4]).unwrap();
        assert!((m.slope - 3.0).abs() < 1e-12);
        assert!((m.offset + 2.0).abs() < 1e-12);
        assert!((m.apply(10.0) - 28.0).abs() < 1e-12);
    }

    #[test]
    fn test_affine_fit_weights() {
        // The zero-weight outlier must not influence the fit.
        let xs = [0.0, 1.0, 2.0, 3.0];
        let ys = [0.0, 1.0, 2.0, 100.0];
        let m = AffineModel1D::fit(&xs, &ys, &[1.0, 1.0, 1.0, 0.0]).unwrap();
        assert!((m.slope - 1.0).abs() < 1e-12);
        assert!(m.offset.abs() < 1e-12);
    }

    #[test]
    fn test_affine_fit_failures() {
        assert_eq!(
            AffineModel1D::fit(&[1.0], &[0.0], &[1.0]),
            Err(ZSpacingError::InsufficientData { available: 1 })
        );
        assert!(matches!(
            AffineModel1D::fit(&[2.0, 2.0, 2.0], &[0.0, 1.0, 2.0], &[1.0; 3]),
            Err(ZSpacingError::IllDefinedData { .. })
        ));
        // NaN points are skipped before counting
        assert_eq!(
            AffineModel1D::fit(&[f64::NAN, 1.0], &[0.0, 1.0], &[1.0; 2]),
            Err(ZSpacingError::InsufficientData { available: 1 })
        );
    }

    #[test]
    fn test_identity_regularizer() {
        let mut coords = vec![10.0, 12.0, 14.0, 16.0];
        let reg = Regularizer::new(RegularizationType::Identity, 4);
        reg.regularize(&mut coords).unwrap();
        for (i, c) in coords.iter().enumerate() {
            assert!((c - i as f64).abs() < 1e-12, "{coords:?}");
        }
    }

    #[test]
    fn test_border_regularizer_pins_ends() {
        let mut coords = vec![-1.0, 0.0, 3.0, 5.0];
        let reg = Regularizer::new(RegularizationType::Border, 4);
        let model = reg.regularize(&mut coords).unwrap();
        assert!(coords[0].abs() < 1e-12);
        assert!((coords[3] - 3.0).abs() < 1e-12);
        assert!((coords[1] - 0.5).abs() < 1e-12);
        assert!((model.slope - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_border_regularizer_coincident_ends() {
        let mut coords = vec![1.0, 1.0, 1.0];
        let reg = Regularizer::new(RegularizationType::Border, 3);
        assert!(matches!(
            reg.regularize(&mut coords),
            Err(ZSpacingError::IllDefinedData { .. })
        ));
        assert_eq!(coords, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_none_regularizer_is_noop() {
        let mut coords = vec![3.0, 1.0, 7.0];
        let reg = Regularizer::new(RegularizationType::None, 3);
        assert_eq!(reg.regularize(&mut coords), Ok(AffineModel1D::IDENTITY));
        assert_eq!(coords, vec![3.0, 1.0, 7.0]);
    }

    #[test]
    fn test_type_parsing() {
        assert_eq!("Border".parse::<RegularizationType>(), Ok(RegularizationType::Border));
        assert_eq!("identity".parse::<RegularizationType>(), Ok(RegularizationType::Identity));
        assert!("affine".parse::<RegularizationType>().is_err());
        assert_eq!(RegularizationType::None.to_string(), "none");
    }
}
