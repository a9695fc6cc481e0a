//! # zspacing
//!
//! Axial (Z) **spacing estimation** for serial-section image stacks.
//!
//! Serial sections are nominally cut at equal thickness, but in practice the
//! stack is locally compressed, stretched or missing material. Given an N×N
//! matrix of pairwise slice similarities (normalized cross-correlation,
//! feature-consensus score, ...), `zspacing` estimates a refined Z coordinate
//! for every slice such that similarity decays with distance the same way
//! everywhere in the stack.
//!
//! ## Features
//!
//! - **Matrix driven**: only the band `|i − j| ≤ R` of the similarity matrix is
//!   used; NaN marks missing comparisons
//! - **Per-slice scaling**: slices with unusually low or high similarity are
//!   compensated with a multiplicative factor
//! - **Regularized**: optional identity or border pinning keeps the stack from
//!   drifting
//! - **Order control**: slices may swap, or stay ordered with a minimum
//!   section thickness
//! - **Observable**: a visitor sees the full state after every iteration
//!
//! ## Example
//!
//! ```no_run
//! use nalgebra::DMatrix;
//! use zspacing::{estimate_z_coordinates, Options, RegularizationType};
//!
//! // Similarity of slices i and j, NaN where not compared
//! let n = 50;
//! let matrix = DMatrix::<f32>::from_fn(n, n, |i, j| {
//!     let d = (i as f32 - j as f32).abs();
//!     if d <= 10.0 { (-d / 4.0).exp() } else { f32::NAN }
//! });
//! let start: Vec<f64> = (0..n).map(|i| i as f64).collect();
//!
//! let options = Options {
//!     comparison_range: 10,
//!     n_iterations: 100,
//!     regularization_type: RegularizationType::Border,
//!     ..Default::default()
//! };
//! let z = estimate_z_coordinates(&matrix, &start, &options).unwrap();
//! println!("refined z: {z:?}");
//! ```
//!
//! ## Algorithm overview
//!
//! 1. **Sort**: order slices by their current coordinate
//! 2. **Fit**: average the scaled similarities by real distance into a profile `F(d)`
//! 3. **Scale**: fit per-slice factors so that each scaled row `s[z]·s[k]·M` matches `F`
//! 4. **Shift**: invert `F` for each neighbour pair to propose a position, average
//!    the proposals per slice and move by a damped step
//! 5. **Regularize**: repair NaNs, optionally enforce ordering, pin with an affine fit
//!
//! See [`inference`] for details.

pub mod error;
pub mod inference;
pub mod layers;
pub mod lut;
pub mod permutation;
pub mod strip;

pub use error::{Result, ZSpacingError};
pub use inference::fit::{CorrelationFit, FitInverse};
pub use inference::regularize::{AffineModel1D, RegularizationType, Regularizer};
pub use inference::visitor::{
    IterationSnapshot, IterationState, LoggingVisitor, NoopVisitor, RecordingVisitor, Visitor,
};
pub use inference::{estimate_z_coordinates, EstimationResult, Options, ZSpacingEstimator};
pub use layers::LayerStack;
pub use lut::LutTransform;
pub use strip::{BandStrip, MatrixView};
