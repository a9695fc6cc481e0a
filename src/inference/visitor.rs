//! Iteration observers.
//!
//! A [`Visitor`] is called once before the first iteration (iteration 0, no
//! fit yet) and once after every iteration with a read-only view of the
//! estimator state. Closures taking `&IterationState` are visitors too.

use tracing::info;

use crate::strip::{BandStrip, MatrixView};

use super::fit::CorrelationFit;

/// Snapshot of the estimator handed to a [`Visitor`].
///
/// `lut` is in original slice order. `scaling_factors` and `matrix` are in
/// the sorted order given by `permutation`; `scaled_matrix` holds the band
/// exactly as the iteration used it, in that iteration's sorted order.
pub struct IterationState<'a> {
    /// 0 before the first iteration, then 1, 2, …
    pub iteration: usize,
    /// Input similarity matrix in sorted order.
    pub matrix: &'a dyn MatrixView,
    /// Band of the scaled matrix used during the iteration.
    pub scaled_matrix: &'a BandStrip,
    pub lut: &'a [f64],
    pub permutation: &'a [usize],
    pub inverse: &'a [usize],
    pub scaling_factors: &'a [f64],
    pub fit: Option<&'a CorrelationFit>,
    pub average_shift: f64,
}

pub trait Visitor {
    fn act(&mut self, state: &IterationState<'_>);
}

impl<F> Visitor for F
where
    F: FnMut(&IterationState<'_>),
{
    fn act(&mut self, state: &IterationState<'_>) {
        self(state)
    }
}

/// Does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopVisitor;

impl Visitor for NoopVisitor {
    fn act(&mut self, _state: &IterationState<'_>) {}
}

/// Logs a one-line summary of every iteration at `info` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingVisitor;

impl Visitor for LoggingVisitor {
    fn act(&mut self, state: &IterationState<'_>) {
        let (min, max) = state
            .lut
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        info!(
            "iteration {}: avg shift {:.3e}, z range [{:.3}, {:.3}], fit length {}",
            state.iteration,
            state.average_shift,
            min,
            max,
            state.fit.map_or(0, |f| f.values().len())
        );
    }
}

/// Owned copy of the interesting parts of an [`IterationState`].
#[derive(Debug, Clone, PartialEq)]
pub struct IterationSnapshot {
    pub iteration: usize,
    pub lut: Vec<f64>,
    pub permutation: Vec<usize>,
    pub inverse: Vec<usize>,
    pub scaling_factors: Vec<f64>,
    pub fit: Option<Vec<f64>>,
    pub average_shift: f64,
}

/// Keeps a snapshot of every call.
#[derive(Debug, Clone, Default)]
pub struct RecordingVisitor {
    pub snapshots: Vec<IterationSnapshot>,
}

impl RecordingVisitor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Visitor for RecordingVisitor {
    fn act(&mut self, state: &IterationState<'_>) {
        self.snapshots.push(IterationSnapshot {
            iteration: state.iteration,
            lut: state.lut.to_vec(),
            permutation: state.permutation.to_vec(),
            inverse: state.inverse.to_vec(),
            scaling_factors: state.scaling_factors.to_vec(),
            fit: state.fit.map(|f| f.values().to_vec()),
            average_shift: state.average_shift,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    fn visit(visitor: &mut dyn Visitor, iteration: usize, fit: Option<&CorrelationFit>) {
        let m = DMatrix::<f32>::identity(3, 3);
        let strip = BandStrip::from_matrix(&m, 1);
        let lut = [0.0, 1.0, 2.0];
        let perm = [0, 1, 2];
        let s = [1.0; 3];
        let state = IterationState {
            iteration,
            matrix: &m,
            scaled_matrix: &strip,
            lut: &lut,
            permutation: &perm,
            inverse: &perm,
            scaling_factors: &s,
            fit,
            average_shift: 0.25,
        };
        visitor.act(&state);
    }

    #[test]
    fn test_recording_visitor() {
        let fit = CorrelationFit::from_values(vec![1.0, 0.5]);
        let mut rec = RecordingVisitor::new();
        visit(&mut rec, 0, None);
        visit(&mut rec, 1, Some(&fit));
        assert_eq!(rec.snapshots.len(), 2);
        assert_eq!(rec.snapshots[0].fit, None);
        assert_eq!(rec.snapshots[1].fit, Some(vec![1.0, 0.5]));
        assert_eq!(rec.snapshots[1].lut, vec![0.0, 1.0, 2.0]);
        assert_eq!(rec.snapshots[1].average_shift, 0.25);
    }

    #[test]
    fn test_closure_visitor() {
        let mut seen = Vec::new();
        let mut closure = |state: &IterationState<'_>| seen.push(state.iteration);
        visit(&mut closure, 3, None);
        visit(&mut LoggingVisitor, 4, None);
        visit(&mut NoopVisitor, 5, None);
        assert_eq!(seen, vec![3]);
    }
}
