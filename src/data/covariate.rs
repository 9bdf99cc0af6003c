//! # Independent Variable
//!
//! Per-sample covariate the amalgamated series are regressed against.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::{PhyloFactorError, Result};

/// Covariate values, one per sample.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndependentVariable {
    Continuous(Vec<f64>),
    /// Sorted level names; `codes[j]` indexes into `levels`. The first level
    /// is the regression reference.
    Categorical { levels: Vec<String>, codes: Vec<usize> },
}

impl IndependentVariable {
    pub fn continuous(values: Vec<f64>) -> Result<Self> {
        if let Some(v) = values.iter().find(|v| !v.is_finite()) {
            return Err(PhyloFactorError::validation(format!(
                "covariate values must be finite, found {}",
                v
            )));
        }
        Ok(Self::Continuous(values))
    }

    pub fn categorical<S: AsRef<str>>(values: &[S]) -> Self {
        let levels: Vec<String> = values
            .iter()
            .map(|v| v.as_ref().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let codes = values
            .iter()
            .map(|v| levels.iter().position(|l| l == v.as_ref()).unwrap_or(0))
            .collect();
        Self::Categorical { levels, codes }
    }

    /// Numeric if every value parses as a finite number, categorical otherwise.
    pub fn parse<S: AsRef<str>>(values: &[S]) -> Self {
        let parsed: Option<Vec<f64>> = values
            .iter()
            .map(|v| v.as_ref().trim().parse::<f64>().ok().filter(|x| x.is_finite()))
            .collect();
        match parsed {
            Some(numbers) => Self::Continuous(numbers),
            None => Self::categorical(values),
        }
    }

    pub fn n_samples(&self) -> usize {
        match self {
            Self::Continuous(values) => values.len(),
            Self::Categorical { codes, .. } => codes.len(),
        }
    }

    pub fn is_categorical(&self) -> bool {
        matches!(self, Self::Categorical { .. })
    }

    /// Reorder samples.
    pub fn select(&self, order: &[usize]) -> Self {
        match self {
            Self::Continuous(values) => Self::Continuous(order.iter().map(|&j| values[j]).collect()),
            Self::Categorical { levels, codes } => Self::Categorical {
                levels: levels.clone(),
                codes: order.iter().map(|&j| codes[j]).collect(),
            },
        }
    }
}
