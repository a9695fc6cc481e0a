//! Error type shared by every estimation entry point.

use thiserror::Error;

/// Errors surfaced by the Z-coordinate estimator.
///
/// Numerical trouble confined to a few slices is repaired locally (shift
/// interpolation, NaN replacement) and never reaches the caller; these
/// variants describe failures that abort a run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ZSpacingError {
    /// An affine fit was requested with fewer than two usable points.
    #[error("not enough data points to fit an affine model (need 2, got {available})")]
    InsufficientData { available: usize },
    /// The data points do not define a unique affine model
    /// (e.g. all source coordinates coincide).
    #[error("ill-defined data points: {reason}")]
    IllDefinedData { reason: String },
    /// Input arrays have inconsistent shapes.
    #[error("invalid dimensions for {what}: expected {expected}, got {actual}")]
    InvalidDimensions {
        what: &'static str,
        expected: String,
        actual: String,
    },
    /// An option is out of its admissible range.
    #[error("invalid option `{name}`: {reason}")]
    InvalidOptions { name: &'static str, reason: String },
    /// Every coordinate became non-finite during an iteration.
    #[error("numerical breakdown in iteration {iteration}: no finite coordinates left")]
    NumericalBreakdown { iteration: usize },
}

impl ZSpacingError {
    pub(crate) fn dimensions(
        what: &'static str,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        ZSpacingError::InvalidDimensions {
            what,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub(crate) fn option(name: &'static str, reason: impl Into<String>) -> Self {
        ZSpacingError::InvalidOptions {
            name,
            reason: reason.into(),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ZSpacingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_problem() {
        let e = ZSpacingError::dimensions("matrix", "10x10", "10x9");
        assert_eq!(
            e.to_string(),
            "invalid dimensions for matrix: expected 10x10, got 10x9"
        );

        let e = ZSpacingError::option("comparison_range", "must be at least 1");
        assert!(e.to_string().contains("comparison_range"));
    }
}
