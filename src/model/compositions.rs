//! # Compositional Math
//!
//! Closure and log-ratio primitives on column-oriented matrices
//! (rows = parts, columns = samples). Callers pass strictly positive values;
//! nothing here re-validates that.

use nalgebra::{DMatrix, DVector};

/// Rescale a composition to sum to one.
pub fn close(values: &mut [f64]) {
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        values.iter_mut().for_each(|v| *v /= total);
    }
}

/// Close every column of a parts x samples matrix.
pub fn close_columns(matrix: &mut DMatrix<f64>) {
    for mut column in matrix.column_iter_mut() {
        let total = column.sum();
        if total > 0.0 {
            column /= total;
        }
    }
}

/// Elementwise natural log.
pub fn log(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    matrix.map(f64::ln)
}

/// Centered log-ratio transform of each column.
pub fn clr(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = log(matrix);
    for mut column in out.column_iter_mut() {
        let mean = column.mean();
        column.add_scalar_mut(-mean);
    }
    out
}

/// Sample variance (n - 1 denominator) of a slice, two-pass.
pub fn variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let ss: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    ss / (n - 1) as f64
}

/// Variance of all entries of a matrix, as if flattened.
pub fn matrix_variance(matrix: &DMatrix<f64>) -> f64 {
    variance(matrix.as_slice())
}

/// Variance of `clr - basis * fitted^T` over all entries, without
/// materializing the residual matrix.
pub fn residual_variance(clr: &DMatrix<f64>, basis: &DVector<f64>, fitted: &DVector<f64>) -> f64 {
    let (n_parts, n_samples) = clr.shape();
    let n = n_parts * n_samples;
    if n < 2 {
        return f64::NAN;
    }
    let residual = |i: usize, j: usize| clr[(i, j)] - basis[i] * fitted[j];

    let mut sum = 0.0;
    for j in 0..n_samples {
        for i in 0..n_parts {
            sum += residual(i, j);
        }
    }
    let mean = sum / n as f64;

    let mut ss = 0.0;
    for j in 0..n_samples {
        for i in 0..n_parts {
            let d = residual(i, j) - mean;
            ss += d * d;
        }
    }
    ss / (n - 1) as f64
}

/// Inverse projection of one fitted log-ratio coordinate: column `j` is
/// `closure(exp(basis * fitted[j]))`.
pub fn predicted_composition(basis: &DVector<f64>, fitted: &DVector<f64>) -> DMatrix<f64> {
    let mut prediction = (basis * fitted.transpose()).map(f64::exp);
    close_columns(&mut prediction);
    prediction
}

/// Divide data by a predicted composition and re-close.
pub fn residual_composition(data: &DMatrix<f64>, prediction: &DMatrix<f64>) -> DMatrix<f64> {
    let mut residual = data.component_div(prediction);
    close_columns(&mut residual);
    residual
}
