//! # Regression Adapter
//!
//! Fits an amalgamated series against the independent variable.
//!
//! ## Contract
//! - fitted values aligned to the input samples
//! - a convergence flag (a failed fit is reported, not fatal; the fallback
//!   predicts the response mean)
//! - an F-statistic and its p-value for ranking and stopping
//!
//! The only family shipped is the Gaussian GLM with identity link, solved by
//! SVD least squares. Other families plug in through [`RegressionModel`].

use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

use crate::data::IndependentVariable;
use crate::error::{PhyloFactorError, Result};

/// Right-hand side of the model `amalgamation ~ f(X)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Formula {
    /// `Data ~ X`
    #[default]
    Linear,
    /// `Data ~ X + X^2 + ... + X^degree` on the centered covariate
    Polynomial { degree: usize },
}

impl std::fmt::Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linear => write!(f, "Data ~ X"),
            Self::Polynomial { degree } => write!(f, "Data ~ poly(X, {})", degree),
        }
    }
}

/// Intercept plus covariate columns, samples x terms.
#[derive(Clone, Debug)]
pub struct DesignMatrix {
    matrix: DMatrix<f64>,
}

impl DesignMatrix {
    pub fn build(x: &IndependentVariable, formula: Formula) -> Result<Self> {
        let n = x.n_samples();
        let matrix = match (x, formula) {
            (IndependentVariable::Continuous(values), Formula::Linear) => {
                DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { values[i] })
            }
            (IndependentVariable::Continuous(values), Formula::Polynomial { degree }) => {
                if degree == 0 {
                    return Err(PhyloFactorError::validation("polynomial degree must be at least 1"));
                }
                let mean = values.iter().sum::<f64>() / n.max(1) as f64;
                DMatrix::from_fn(n, degree + 1, |i, j| (values[i] - mean).powi(j as i32))
            }
            (IndependentVariable::Categorical { levels, codes }, Formula::Linear) => {
                // Treatment contrasts against the first level
                DMatrix::from_fn(n, levels.len().max(1), |i, j| {
                    if j == 0 || codes[i] == j {
                        1.0
                    } else {
                        0.0
                    }
                })
            }
            (IndependentVariable::Categorical { .. }, Formula::Polynomial { .. }) => {
                return Err(PhyloFactorError::validation(
                    "polynomial formulas need a continuous covariate",
                ));
            }
        };
        Ok(Self { matrix })
    }

    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_terms(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }
}

/// Result of one regression.
#[derive(Clone, Debug, Serialize)]
pub struct RegressionFit {
    pub fitted: DVector<f64>,
    pub coefficients: DVector<f64>,
    pub converged: bool,
    pub f_statistic: f64,
    pub p_value: f64,
    pub df_model: usize,
    pub df_residual: usize,
    /// Residual sum of squares
    pub rss: f64,
    /// Total (centered) sum of squares
    pub tss: f64,
}

/// Regression service used by the objective evaluator.
pub trait RegressionModel: Send + Sync {
    fn fit(&self, response: &DVector<f64>, design: &DesignMatrix) -> RegressionFit;
}

/// Gaussian GLM with identity link (ordinary least squares).
#[derive(Clone, Copy, Debug, Default)]
pub struct GaussianGlm;

impl RegressionModel for GaussianGlm {
    fn fit(&self, response: &DVector<f64>, design: &DesignMatrix) -> RegressionFit {
        let x = design.matrix();
        let n = response.len();
        let mean = response.mean();
        let tss: f64 = response.iter().map(|y| (y - mean) * (y - mean)).sum();

        match solve_least_squares(x, response) {
            Some((coefficients, rank)) => {
                let fitted = x * &coefficients;
                let rss = (response - &fitted).norm_squared();
                let df_model = rank.saturating_sub(1);
                let df_residual = n.saturating_sub(rank);
                let constant = is_constant(response, tss);
                let (f_statistic, p_value) = f_test(tss, rss, df_model, df_residual, constant);
                RegressionFit {
                    fitted,
                    coefficients,
                    converged: true,
                    f_statistic,
                    p_value,
                    df_model,
                    df_residual,
                    rss,
                    tss,
                }
            }
            None => RegressionFit {
                fitted: DVector::from_element(n, mean),
                coefficients: DVector::zeros(design.n_terms()),
                converged: false,
                f_statistic: f64::NAN,
                p_value: f64::NAN,
                df_model: 0,
                df_residual: n.saturating_sub(1),
                rss: tss,
                tss,
            },
        }
    }
}

/// Solve least squares by SVD, relaxing the singular-value cutoff until the
/// solution is finite. Returns the coefficients and the numerical rank.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<(DVector<f64>, usize)> {
    if x.nrows() == 0 || x.nrows() != y.len() {
        return None;
    }
    // SVD of a non-finite matrix panics inside nalgebra
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return None;
    }
    let svd = x.clone().svd(true, true);
    let max_sv = svd.singular_values.max();
    if !max_sv.is_finite() || max_sv <= 0.0 {
        return None;
    }

    for &tol in &[1e-10, 1e-8, 1e-6] {
        let cutoff = tol * max_sv;
        if let Ok(beta) = svd.solve(y, cutoff) {
            if beta.iter().all(|v| v.is_finite()) {
                let rank = svd.singular_values.iter().filter(|s| **s > cutoff).count();
                return Some((beta, rank));
            }
        }
    }
    None
}

fn is_constant(response: &DVector<f64>, tss: f64) -> bool {
    let scale = response.amax().max(f64::MIN_POSITIVE);
    tss <= response.len() as f64 * (1e-12 * scale).powi(2)
}

/// Overall F-test of the model against the intercept-only model.
fn f_test(tss: f64, rss: f64, df_model: usize, df_residual: usize, constant: bool) -> (f64, f64) {
    if constant || df_model == 0 || df_residual == 0 {
        return (f64::NAN, f64::NAN);
    }
    if rss <= 0.0 {
        return (f64::INFINITY, 0.0);
    }
    let explained = (tss - rss).max(0.0);
    let f = (explained / df_model as f64) / (rss / df_residual as f64);
    let p = FisherSnedecor::new(df_model as f64, df_residual as f64)
        .map(|dist| dist.sf(f))
        .unwrap_or(f64::NAN);
    (f, p)
}
