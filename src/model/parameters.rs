//! # Factorization Parameters
//!
//! Plain data describing one run: what is optimized, how groups are
//! amalgamated, the regression formula, when to stop, and how raw data is
//! cleaned. Validated once before the loop starts.

use serde::Serialize;

use crate::error::{PhyloFactorError, Result};
use crate::model::amalgamation::AmalgamationMethod;
use crate::model::objective::Objective;
use crate::model::regression::Formula;
use crate::model::stopping::{StopRule, StopTiming};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FactorizationParams {
    pub objective: Objective,
    pub method: AmalgamationMethod,
    pub formula: Formula,
    /// Stop after this many committed factors
    pub n_factors: Option<usize>,
    /// `None` runs until the factor target or until every atom is a single tip
    pub stop_rule: Option<StopRule>,
    /// Zeros become `zero_replacement` x the smallest positive value of their sample
    pub zero_replacement: f64,
    /// Allowed deviation of a sample's sum from 1 before it is renormalized
    pub tolerance: f64,
}

impl Default for FactorizationParams {
    fn default() -> Self {
        Self {
            objective: Objective::ResidualVariance,
            method: AmalgamationMethod::Ilr,
            formula: Formula::Linear,
            n_factors: None,
            stop_rule: Some(StopRule::ks(StopTiming::BeforeCommit)),
            zero_replacement: 0.65,
            tolerance: 1e-10,
        }
    }
}

impl FactorizationParams {
    pub fn validate(&self) -> Result<()> {
        self.method.ensure_supported()?;
        if self.n_factors == Some(0) {
            return Err(PhyloFactorError::validation("number of factors must be positive"));
        }
        if !(self.zero_replacement > 0.0 && self.zero_replacement <= 1.0) {
            return Err(PhyloFactorError::validation(format!(
                "zero replacement factor must lie in (0, 1], got {}",
                self.zero_replacement
            )));
        }
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return Err(PhyloFactorError::validation("column-sum tolerance must be positive"));
        }
        if let Some(StopRule::KolmogorovSmirnov { threshold, .. }) = self.stop_rule {
            if !(threshold > 0.0 && threshold < 1.0) {
                return Err(PhyloFactorError::validation(format!(
                    "KS threshold must lie in (0, 1), got {}",
                    threshold
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn rule_at(&self, timing: StopTiming) -> Option<StopRule> {
        self.stop_rule.filter(|rule| rule.timing() == timing)
    }
}
