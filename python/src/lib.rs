//! Python bindings for zspacing via PyO3.
//!
//! Exposes the Z-coordinate estimator to Python as the `pyzspacing` module.

use nalgebra::DMatrix;
use numpy::{PyArray1, PyArray2, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use zspacing::{
    LayerStack, Options, RecordingVisitor, RegularizationType, ZSpacingError, ZSpacingEstimator,
};

fn to_py_err(e: ZSpacingError) -> PyErr {
    match e {
        ZSpacingError::InvalidDimensions { .. } | ZSpacingError::InvalidOptions { .. } => {
            pyo3::exceptions::PyValueError::new_err(e.to_string())
        }
        _ => pyo3::exceptions::PyRuntimeError::new_err(e.to_string()),
    }
}

fn matrix_from_numpy(matrix: &PyReadonlyArray2<f64>) -> DMatrix<f32> {
    let arr = matrix.as_array();
    let (rows, cols) = (arr.shape()[0], arr.shape()[1]);
    DMatrix::from_fn(rows, cols, |r, c| arr[[r, c]] as f32)
}

fn vec_from_numpy(values: Option<PyReadonlyArray1<f64>>) -> Option<Vec<f64>> {
    values.map(|v| v.as_array().to_vec())
}

// ═══════════════════════════════════════════════════════════════════════════
// estimate_z_coordinates
// ═══════════════════════════════════════════════════════════════════════════

/// Estimate refined Z coordinates of a slice stack from its similarity matrix.
///
/// Args:
///     matrix: NxN numpy array of pairwise slice similarities. NaN = not compared.
///     starting_coordinates: Initial coordinates, length N. None = 0, 1, ..., N-1.
///     comparison_range: Half-width of the compared band. Default 10.
///     n_iterations: Outer iterations. Default 100.
///     shift_proportion: Damping of applied shifts. Default 0.6.
///     pairwise_potential_regularizer: Pull towards the average shift. Default 0.0.
///     scaling_factor_regularizer_weight: Shrinkage of scaling factors towards 1,
///         in [0, 1]. Default 0.1.
///     scaling_factor_estimation_iterations: Inner scaling passes. Default 10.
///     minimum_section_thickness: Minimum gap when reordering is off. Default 0.0.
///     with_reorder: Allow slices to swap order. Default True.
///     with_regularization: Apply the regularizer. Default True.
///     regularization_type: "none", "identity" or "border". Default "border".
///     function_estimate: Fixed similarity profile (R+1 or 2R+1 samples). None = estimate.
///     scaling_factors: Initial scaling factors, length N. None = all 1.
///     estimate_weights: NxN weights for fit and scaling estimation. None = all 1.
///     shift_weights: Per-slice weights of shift proposals. None = all 1.
///     record_iterations: Also return the coordinates after every iteration.
///
/// Returns:
///     dict with keys: 'coordinates', 'scaling_factors', 'fit', 'average_shifts',
///     'elapsed_ms', and 'iterations' (KxN array, only if record_iterations).
#[pyfunction]
#[pyo3(signature = (
    matrix,
    starting_coordinates = None,
    comparison_range = 10,
    n_iterations = 100,
    shift_proportion = 0.6,
    pairwise_potential_regularizer = 0.0,
    scaling_factor_regularizer_weight = 0.1,
    scaling_factor_estimation_iterations = 10,
    minimum_section_thickness = 0.0,
    with_reorder = true,
    with_regularization = true,
    regularization_type = "border",
    function_estimate = None,
    scaling_factors = None,
    estimate_weights = None,
    shift_weights = None,
    record_iterations = false,
))]
#[allow(clippy::too_many_arguments)]
fn estimate_z_coordinates<'py>(
    py: Python<'py>,
    matrix: PyReadonlyArray2<f64>,
    starting_coordinates: Option<PyReadonlyArray1<f64>>,
    comparison_range: usize,
    n_iterations: usize,
    shift_proportion: f64,
    pairwise_potential_regularizer: f64,
    scaling_factor_regularizer_weight: f64,
    scaling_factor_estimation_iterations: usize,
    minimum_section_thickness: f64,
    with_reorder: bool,
    with_regularization: bool,
    regularization_type: &str,
    function_estimate: Option<PyReadonlyArray1<f64>>,
    scaling_factors: Option<PyReadonlyArray1<f64>>,
    estimate_weights: Option<PyReadonlyArray2<f64>>,
    shift_weights: Option<PyReadonlyArray1<f64>>,
    record_iterations: bool,
) -> PyResult<Bound<'py, PyDict>> {
    let matrix = matrix_from_numpy(&matrix);
    let n = matrix.nrows();
    let start = vec_from_numpy(starting_coordinates)
        .unwrap_or_else(|| (0..n).map(|i| i as f64).collect());

    let options = Options {
        comparison_range,
        n_iterations,
        shift_proportion,
        pairwise_potential_regularizer,
        scaling_factor_regularizer_weight,
        scaling_factor_estimation_iterations,
        minimum_section_thickness,
        with_reorder,
        with_regularization,
        regularization_type: regularization_type
            .parse::<RegularizationType>()
            .map_err(to_py_err)?,
    };

    let function_estimate = vec_from_numpy(function_estimate);
    let scaling_factors = vec_from_numpy(scaling_factors);
    let shift_weights = vec_from_numpy(shift_weights);
    let estimate_weights = estimate_weights.map(|w| {
        let arr = w.as_array();
        DMatrix::from_fn(arr.shape()[0], arr.shape()[1], |r, c| arr[[r, c]])
    });

    let mut estimator = ZSpacingEstimator::new(&matrix, &start, options);
    if let Some(f) = &function_estimate {
        estimator = estimator.with_function_estimate(f);
    }
    if let Some(s) = &scaling_factors {
        estimator = estimator.with_scaling_factors(s);
    }
    if let Some(w) = &estimate_weights {
        estimator = estimator.with_estimate_weights(w);
    }
    if let Some(w) = &shift_weights {
        estimator = estimator.with_shift_weights(w);
    }

    let mut recorder = RecordingVisitor::new();
    let result = if record_iterations {
        estimator.estimate_with_visitor(&mut recorder)
    } else {
        estimator.estimate()
    }
    .map_err(to_py_err)?;

    let dict = PyDict::new(py);
    dict.set_item("coordinates", PyArray1::from_vec(py, result.coordinates))?;
    dict.set_item(
        "scaling_factors",
        PyArray1::from_vec(py, result.scaling_factors),
    )?;
    dict.set_item("fit", PyArray1::from_slice(py, result.fit.values()))?;
    dict.set_item("average_shifts", PyArray1::from_vec(py, result.average_shifts))?;
    dict.set_item("elapsed_ms", result.elapsed_ms as f64)?;
    if record_iterations {
        let rows: Vec<Vec<f64>> = recorder.snapshots.into_iter().map(|s| s.lut).collect();
        let iterations = PyArray2::from_vec2(py, &rows)
            .map_err(|e| pyo3::exceptions::PyRuntimeError::new_err(e.to_string()))?;
        dict.set_item("iterations", iterations)?;
    }
    Ok(dict)
}

// ═══════════════════════════════════════════════════════════════════════════
// estimate_layer_positions: physical Z in, physical Z out
// ═══════════════════════════════════════════════════════════════════════════

/// Correct physical layer positions from the layers' similarity matrix.
///
/// Positions are normalized so that the first two layers are one unit apart,
/// estimated, and mapped back to the input units.
///
/// Args:
///     matrix: NxN numpy array of pairwise layer similarities.
///     layer_z: Physical Z of each layer, length N.
///     comparison_range: Half-width of the compared band. Default 10.
///     n_iterations: Outer iterations. Default 100.
///     shift_proportion: Damping of applied shifts. Default 0.6.
///     scaling_factor_estimation_iterations: Inner scaling passes. Default 10.
///     scaling_factor_regularizer_weight: Shrinkage of scaling factors. Default 0.1.
///     with_reorder: Allow layers to swap order. Default True.
///
/// Returns:
///     numpy array of corrected physical Z positions.
#[pyfunction]
#[pyo3(signature = (
    matrix,
    layer_z,
    comparison_range = 10,
    n_iterations = 100,
    shift_proportion = 0.6,
    scaling_factor_estimation_iterations = 10,
    scaling_factor_regularizer_weight = 0.1,
    with_reorder = true,
))]
#[allow(clippy::too_many_arguments)]
fn estimate_layer_positions<'py>(
    py: Python<'py>,
    matrix: PyReadonlyArray2<f64>,
    layer_z: PyReadonlyArray1<f64>,
    comparison_range: usize,
    n_iterations: usize,
    shift_proportion: f64,
    scaling_factor_estimation_iterations: usize,
    scaling_factor_regularizer_weight: f64,
    with_reorder: bool,
) -> PyResult<Bound<'py, PyArray1<f64>>> {
    let matrix = matrix_from_numpy(&matrix);
    let stack = LayerStack::from_z(&layer_z.as_array().to_vec()).map_err(to_py_err)?;
    let options = Options {
        comparison_range,
        n_iterations,
        shift_proportion,
        scaling_factor_estimation_iterations,
        scaling_factor_regularizer_weight,
        with_reorder,
        ..Default::default()
    };
    let z = stack.estimate(&matrix, &options).map_err(to_py_err)?;
    Ok(PyArray1::from_vec(py, z))
}

// ═══════════════════════════════════════════════════════════════════════════
// Module definition
// ═══════════════════════════════════════════════════════════════════════════

/// pyzspacing: Z-spacing estimation for serial-section stacks
///
/// Estimates refined slice coordinates from a pairwise similarity matrix,
/// exposed to Python via PyO3.
#[pymodule]
fn pyzspacing(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(estimate_z_coordinates, m)?)?;
    m.add_function(wrap_pyfunction!(estimate_layer_positions, m)?)?;
    Ok(())
}
