//! # Composition Matrix
//!
//! Parts x samples table of relative abundances. Rows carry taxon labels
//! (matched against tree tips), columns carry sample names.
//!
//! ## Lifecycle
//! 1. `CompositionMatrix::new` checks shape and value sanity.
//! 2. `prepare` replaces zeros and closes columns, returning warnings.
//! 3. `select_rows` reorders rows into tree tip order.
//! 4. The factorization loop swaps in `residual` after every committed factor.

use std::collections::HashSet;

use nalgebra::DMatrix;
use serde::Serialize;

use crate::error::{NumericalWarning, PhyloFactorError, Result};
use crate::model::compositions;

/// Compositional data matrix.
#[derive(Clone, Debug, Serialize)]
pub struct CompositionMatrix {
    taxa: Vec<String>,
    samples: Vec<String>,
    values: DMatrix<f64>,
}

impl CompositionMatrix {
    /// Create from a parts x samples matrix.
    ///
    /// Rejects shape mismatches, duplicate labels, negative or non-finite
    /// values and all-zero samples. Zeros and unclosed columns are accepted
    /// here and handled by [`prepare`](Self::prepare).
    pub fn new(taxa: Vec<String>, samples: Vec<String>, values: DMatrix<f64>) -> Result<Self> {
        if values.nrows() != taxa.len() || values.ncols() != samples.len() {
            return Err(PhyloFactorError::validation(format!(
                "data is {}x{} but {} taxa and {} samples were named",
                values.nrows(),
                values.ncols(),
                taxa.len(),
                samples.len()
            )));
        }
        if taxa.is_empty() || samples.is_empty() {
            return Err(PhyloFactorError::validation("data matrix is empty"));
        }
        check_unique(&taxa, "taxon")?;
        check_unique(&samples, "sample")?;

        if let Some(v) = values.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(PhyloFactorError::validation(format!(
                "data must be finite and non-negative, found {}",
                v
            )));
        }
        if let Some(j) = values.column_iter().position(|c| c.sum() <= 0.0) {
            return Err(PhyloFactorError::validation(format!(
                "sample '{}' has no positive values",
                samples[j]
            )));
        }

        Ok(Self {
            taxa,
            samples,
            values,
        })
    }

    /// Create from row vectors (one per taxon).
    pub fn from_rows(taxa: Vec<String>, samples: Vec<String>, rows: &[Vec<f64>]) -> Result<Self> {
        let n_samples = samples.len();
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n_samples) {
            return Err(PhyloFactorError::validation(format!(
                "row {} has {} values, expected {}",
                i,
                row.len(),
                n_samples
            )));
        }
        let values = DMatrix::from_fn(rows.len(), n_samples, |i, j| rows[i][j]);
        Self::new(taxa, samples, values)
    }

    pub fn n_parts(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.values.ncols()
    }

    pub fn taxa(&self) -> &[String] {
        &self.taxa
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn taxon_index(&self, label: &str) -> Option<usize> {
        self.taxa.iter().position(|t| t == label)
    }

    /// Replace zeros by `zero_replacement` times the smallest positive value
    /// of their column, then close any column whose sum is off by more than
    /// `tolerance`.
    pub fn prepare(mut self, zero_replacement: f64, tolerance: f64) -> (Self, Vec<NumericalWarning>) {
        let mut warnings = Vec::new();

        let (mut cells, mut columns) = (0, 0);
        for mut column in self.values.column_iter_mut() {
            let zeros = column.iter().filter(|v| **v == 0.0).count();
            if zeros == 0 {
                continue;
            }
            let min_positive = column
                .iter()
                .copied()
                .filter(|v| *v > 0.0)
                .fold(f64::INFINITY, f64::min);
            let fill = zero_replacement * min_positive;
            column.iter_mut().filter(|v| **v == 0.0).for_each(|v| *v = fill);
            cells += zeros;
            columns += 1;
        }
        if cells > 0 {
            warnings.push(NumericalWarning::ZerosReplaced { cells, columns }.logged());
        }

        let (mut off, mut max_deviation) = (0, 0.0f64);
        for mut column in self.values.column_iter_mut() {
            let deviation = (column.sum() - 1.0).abs();
            if deviation > tolerance {
                off += 1;
                max_deviation = max_deviation.max(deviation);
                let total = column.sum();
                column /= total;
            }
        }
        if off > 0 {
            warnings.push(
                NumericalWarning::ColumnsRenormalized {
                    columns: off,
                    max_deviation,
                }
                .logged(),
            );
        }

        (self, warnings)
    }

    /// New matrix with rows taken in `order`.
    pub fn select_rows(&self, order: &[usize]) -> Self {
        let values = self.values.select_rows(order.iter());
        Self {
            taxa: order.iter().map(|&i| self.taxa[i].clone()).collect(),
            samples: self.samples.clone(),
            values,
        }
    }

    /// Centered log-ratio of every sample.
    pub fn clr(&self) -> DMatrix<f64> {
        compositions::clr(&self.values)
    }

    /// Elementwise log.
    pub fn log(&self) -> DMatrix<f64> {
        compositions::log(&self.values)
    }

    /// Data divided by a predicted composition, re-closed.
    pub fn residual(&self, prediction: &DMatrix<f64>) -> Self {
        Self {
            taxa: self.taxa.clone(),
            samples: self.samples.clone(),
            values: compositions::residual_composition(&self.values, prediction),
        }
    }
}

fn check_unique(labels: &[String], what: &str) -> Result<()> {
    let mut seen = HashSet::with_capacity(labels.len());
    for label in labels {
        if !seen.insert(label.as_str()) {
            return Err(PhyloFactorError::validation(format!(
                "duplicate {} label '{}'",
                what, label
            )));
        }
    }
    Ok(())
}
