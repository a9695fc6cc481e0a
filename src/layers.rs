//! Physical layer positions around an estimation run.
//!
//! Section stacks usually carry physical Z values (nm, µm, arbitrary
//! units). The estimator works in unit steps, so the positions are normalized
//! so that the first layer sits at 0 and the second at 1:
//!
//! ```text
//! unit = (z − z₀) / (z₁ − z₀)
//! z    = unit · (z₁ − z₀) + z₀
//! ```

use nalgebra::DMatrix;
use tracing::debug;

use crate::error::{Result, ZSpacingError};
use crate::inference::{Options, ZSpacingEstimator};

/// Physical Z positions of a layer stack and their unit-step normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerStack {
    z: Vec<f64>,
    z_min: f64,
    step: f64,
}

impl LayerStack {
    /// Normalize the given layer positions.
    ///
    /// Needs at least two layers, and the first two must be distinct.
    pub fn from_z(z: &[f64]) -> Result<Self> {
        let (&z0, &z1) = match z {
            [z0, z1, ..] => (z0, z1),
            _ => return Err(ZSpacingError::InsufficientData { available: z.len() }),
        };
        let step = z1 - z0;
        if !(step.is_finite() && step != 0.0) {
            return Err(ZSpacingError::IllDefinedData {
                reason: format!("first two layers at {z0} and {z1} do not define a step"),
            });
        }
        Ok(Self {
            z: z.to_vec(),
            z_min: z0,
            step,
        })
    }

    pub fn len(&self) -> usize {
        self.z.len()
    }

    pub fn is_empty(&self) -> bool {
        self.z.is_empty()
    }

    /// Physical positions as given.
    pub fn z(&self) -> &[f64] {
        &self.z
    }

    /// Positions in unit steps, suitable as starting coordinates.
    pub fn normalized(&self) -> Vec<f64> {
        self.z
            .iter()
            .map(|&z| (z - self.z_min) / self.step)
            .collect()
    }

    /// Map unit-step coordinates back to physical positions.
    pub fn to_physical(&self, coordinates: &[f64]) -> Vec<f64> {
        coordinates
            .iter()
            .map(|&c| c * self.step + self.z_min)
            .collect()
    }

    /// Estimate corrected physical positions from the layers' similarity matrix.
    pub fn estimate(&self, matrix: &DMatrix<f32>, options: &Options) -> Result<Vec<f64>> {
        let start = self.normalized();
        debug!("normalized layer positions: {:?}", start);
        let result = ZSpacingEstimator::new(matrix, &start, options.clone()).estimate()?;
        debug!("corrected layer positions: {:?}", result.coordinates);
        Ok(self.to_physical(&result.coordinates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_roundtrip() {
        let z = [100.0, 150.0, 200.0, 275.0];
        let stack = LayerStack::from_z(&z).unwrap();
        assert_eq!(stack.normalized(), vec![0.0, 1.0, 2.0, 3.5]);
        let back = stack.to_physical(&stack.normalized());
        for (a, b) in back.iter().zip(&z) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rejects_degenerate_stacks() {
        assert_eq!(
            LayerStack::from_z(&[1.0]),
            Err(ZSpacingError::InsufficientData { available: 1 })
        );
        assert!(matches!(
            LayerStack::from_z(&[2.0, 2.0, 3.0]),
            Err(ZSpacingError::IllDefinedData { .. })
        ));
    }

    #[test]
    fn test_estimate_keeps_consistent_stack() {
        let n = 6;
        let z: Vec<f64> = (0..n).map(|i| 40.0 + 25.0 * i as f64).collect();
        let matrix = DMatrix::<f32>::from_fn(n, n, |r, c| {
            let d = (r as f32 - c as f32).abs();
            if d <= 2.0 {
                1.0 - 0.3 * d
            } else {
                f32::NAN
            }
        });
        let options = Options {
            comparison_range: 2,
            n_iterations: 5,
            scaling_factor_regularizer_weight: 0.5,
            ..Default::default()
        };
        let corrected = LayerStack::from_z(&z).unwrap().estimate(&matrix, &options).unwrap();
        for (a, b) in corrected.iter().zip(&z) {
            assert!((a - b).abs() < 1e-3, "{corrected:?}");
        }
    }
}
