//! # Amalgamation Basis
//!
//! Collapses the two sides of a group into one log-ratio coordinate per sample.
//!
//! ## ILR contrast
//! For sides A (r tips) and B (s tips):
//!
//! ```text
//! v_i = +sqrt(s / (r (r + s)))   i in A
//! v_i = -sqrt(r / (s (r + s)))   i in B
//! v_i = 0                        otherwise
//! ```
//!
//! `v` is unit-norm and sums to zero, so `v . log(x) = v . clr(x)` and the
//! coordinate is an isometry in the Aitchison geometry. Residual variances of
//! groups of different sizes are therefore directly comparable.

use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::error::{PhyloFactorError, Result};
use crate::model::groups::Group;

/// Amalgamation method. Only the ILR contrast is implemented.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum AmalgamationMethod {
    #[default]
    #[serde(rename = "ILR")]
    Ilr,
    /// Additive amalgamation (log ratio of summed parts). Rejected with a
    /// validation error.
    #[serde(rename = "add")]
    Additive,
}

impl AmalgamationMethod {
    pub fn name(self) -> &'static str {
        match self {
            Self::Ilr => "ILR",
            Self::Additive => "add",
        }
    }

    /// Fail early for methods with no implementation.
    pub fn ensure_supported(self) -> Result<()> {
        match self {
            Self::Ilr => Ok(()),
            Self::Additive => Err(PhyloFactorError::unsupported_method(self.name())),
        }
    }
}

impl std::str::FromStr for AmalgamationMethod {
    type Err = PhyloFactorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ILR" | "ilr" => Ok(Self::Ilr),
            "add" => Ok(Self::Additive),
            other => Err(PhyloFactorError::validation(format!(
                "unknown amalgamation method '{}'",
                other
            ))),
        }
    }
}

/// Contrast vector and amalgamated series of one group.
#[derive(Clone, Debug)]
pub struct Amalgamation {
    /// Length n_tips; zero outside the group's atom
    pub basis: DVector<f64>,
    /// Length n_samples
    pub series: DVector<f64>,
}

/// ILR contrast for sides `a` and `b` over `n_tips` parts.
pub fn ilr_basis(n_tips: usize, a: &[usize], b: &[usize]) -> DVector<f64> {
    let r = a.len() as f64;
    let s = b.len() as f64;
    let pos = (s / (r * (r + s))).sqrt();
    let neg = -(r / (s * (r + s))).sqrt();

    let mut basis = DVector::zeros(n_tips);
    for &i in a {
        basis[i] = pos;
    }
    for &i in b {
        basis[i] = neg;
    }
    basis
}

/// Amalgamate a group against log-transformed data (parts x samples).
pub fn amalgamate(
    method: AmalgamationMethod,
    group: &Group,
    log_data: &DMatrix<f64>,
) -> Result<Amalgamation> {
    match method {
        AmalgamationMethod::Ilr => {
            let basis = ilr_basis(log_data.nrows(), &group.side_a, &group.side_b);
            let series = log_data.tr_mul(&basis);
            Ok(Amalgamation { basis, series })
        }
        AmalgamationMethod::Additive => Err(PhyloFactorError::unsupported_method(method.name())),
    }
}
