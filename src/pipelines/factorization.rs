//! # Factorization Pipeline
//!
//! Orchestrates greedy phylofactorization:
//! 1. Reconcile the data with the tree (suppress unary nodes, prune absent
//!    tips, unroot, reorder rows)
//! 2. Replace zeros and close the samples
//! 3. Build the design matrix for the independent variable
//! 4. Iterate: enumerate groups, score them in parallel, test the stopping
//!    rule, commit the winner and divide its prediction out of the data
//! 5. Collect factors, atoms, basis and warnings into [`PhyloFactorization`]
//!
//! Iterations are strictly sequential; only group scoring within an
//! iteration fans out to the worker pool.

use std::collections::BTreeMap;
use std::sync::Arc;

use bitvec::prelude::*;
use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use tracing::{debug, info, info_span};

use crate::data::{CompositionMatrix, IndependentVariable};
use crate::error::{NumericalWarning, PhyloFactorError, Result};
use crate::model::compositions;
use crate::model::groups::{Group, GroupEnumerator};
use crate::model::objective::{evaluate, EvaluationContext};
use crate::model::parameters::FactorizationParams;
use crate::model::partition::PartitionState;
use crate::model::regression::{DesignMatrix, GaussianGlm, RegressionFit, RegressionModel};
use crate::model::stopping::StopTiming;
use crate::tree::{EdgeId, EdgeSplits, PhyloTree};
use crate::utils::telemetry::{Stage, TelemetryBlackboard};
use crate::utils::threading::{Executor, PoolLease, WorkerPool};

/// Raw inputs of a run, before reconciliation.
#[derive(Clone, Debug)]
pub struct FactorizationInput {
    pub data: CompositionMatrix,
    pub tree: PhyloTree,
    pub covariate: IndependentVariable,
}

/// Lifecycle of the loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    Running,
    /// The stopping rule fired
    TerminatedByRule,
    /// The requested factor count, or `n_tips - 1`, was reached
    TerminatedByCount,
    /// No atom with two or more tips remained
    TerminatedByExhaustion,
}

impl LoopStatus {
    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

/// Whether one side of a factor is a clade of the full tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CladeKind {
    Monophyletic,
    Paraphyletic,
}

impl CladeKind {
    fn of(tips: &[usize], splits: &EdgeSplits) -> Self {
        let mut mask = bitvec![0; splits.n_tips()];
        for &tip in tips {
            mask.set(tip, true);
        }
        if splits.is_monophyletic(&mask) {
            Self::Monophyletic
        } else {
            Self::Paraphyletic
        }
    }
}

/// One side of a committed factor.
#[derive(Clone, Debug, Serialize)]
pub struct FactorSide {
    pub tips: Vec<usize>,
    pub labels: Vec<String>,
    pub clade: CladeKind,
}

impl FactorSide {
    fn new(tips: &[usize], tree: &PhyloTree, splits: &EdgeSplits) -> Self {
        Self {
            tips: tips.to_vec(),
            labels: tips.iter().map(|&t| tree.tip_labels()[t].clone()).collect(),
            clade: CladeKind::of(tips, splits),
        }
    }
}

/// A committed factor.
#[derive(Clone, Debug, Serialize)]
pub struct Factor {
    /// 1-based
    pub iteration: usize,
    pub edge: EdgeId,
    pub group_a: FactorSide,
    pub group_b: FactorSide,
    /// Winning objective value
    pub score: f64,
    pub residual_variance: f64,
    /// Fraction of the prepared data's total clr variance removed by this factor
    pub explained_variance: f64,
    pub fit: RegressionFit,
    pub basis: DVector<f64>,
}

/// An atom of the final partition.
#[derive(Clone, Debug, Serialize)]
pub struct AtomSummary {
    pub tips: Vec<usize>,
    pub labels: Vec<String>,
    pub clade: CladeKind,
}

/// Everything a finished run produced.
#[derive(Clone, Debug, Serialize)]
pub struct PhyloFactorization {
    pub params: FactorizationParams,
    pub status: LoopStatus,
    pub factors: Vec<Factor>,
    pub atoms: Vec<AtomSummary>,
    pub atom_size_frequencies: BTreeMap<usize, usize>,
    /// n_tips x n_factors
    pub basis: DMatrix<f64>,
    pub warnings: Vec<NumericalWarning>,
    /// Zero-replaced, closed data in tree tip order
    pub data: CompositionMatrix,
    /// Data after every committed factor was divided out
    pub residual_data: CompositionMatrix,
    /// Pruned, unrooted tree used for the run
    pub tree: String,
    pub tip_labels: Vec<String>,
    /// Total clr variance of `data`
    pub total_variance: f64,
}

impl PhyloFactorization {
    pub fn n_factors(&self) -> usize {
        self.factors.len()
    }

    /// True iff the stopping rule ended the run.
    pub fn terminated_by_rule(&self) -> bool {
        self.status == LoopStatus::TerminatedByRule
    }

    /// Project clr coordinates of `composition` (n_tips x samples) onto the basis.
    pub fn project(&self, composition: &DMatrix<f64>) -> DMatrix<f64> {
        self.basis.transpose() * compositions::clr(composition)
    }
}

/// Reconciled inputs ready for the loop.
struct PreparedInput {
    data: CompositionMatrix,
    tree: PhyloTree,
    covariate: IndependentVariable,
    warnings: Vec<NumericalWarning>,
}

/// Validate inputs and align data rows with the tree's tip order.
fn reconcile(input: FactorizationInput, params: &FactorizationParams) -> Result<PreparedInput> {
    let FactorizationInput {
        data,
        tree,
        covariate,
    } = input;
    let mut warnings = Vec::new();

    if covariate.n_samples() != data.n_samples() {
        return Err(PhyloFactorError::validation(format!(
            "{} samples in data, {} in covariate",
            data.n_samples(),
            covariate.n_samples()
        )));
    }

    if let IndependentVariable::Continuous(values) = &covariate {
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(PhyloFactorError::validation(format!(
                "covariate value for sample {} is not finite",
                data.samples()[i]
            )));
        }
    }

    let missing: Vec<&str> = data
        .taxa()
        .iter()
        .filter(|t| tree.tip_index(t).is_none())
        .map(|t| t.as_str())
        .collect();
    if !missing.is_empty() {
        let shown: Vec<&str> = missing.iter().take(5).copied().collect();
        return Err(PhyloFactorError::validation(format!(
            "{} data taxa are not tips of the tree (e.g. {})",
            missing.len(),
            shown.join(", ")
        )));
    }

    let mut tree = tree;
    let unary = tree.unary_nodes();
    if unary > 0 {
        tree = tree.suppress_unary_nodes()?;
        warnings.push(NumericalWarning::UnaryNodesSuppressed { nodes: unary }.logged());
    }
    let dropped = tree.n_tips() - data.n_parts();
    if dropped > 0 {
        tree = tree.prune(|label| data.taxon_index(label).is_some())?;
        warnings.push(NumericalWarning::TipsPruned { dropped }.logged());
    }
    if tree.is_rooted() {
        tree = tree.unroot()?;
        warnings.push(NumericalWarning::UnrootedTree.logged());
    }

    let order: Vec<usize> = tree
        .tip_labels()
        .iter()
        .map(|label| {
            data.taxon_index(label).ok_or_else(|| {
                PhyloFactorError::algorithm(format!("tip '{}' lost during reconciliation", label))
            })
        })
        .collect::<Result<_>>()?;
    let data = data.select_rows(&order);

    let (data, prep_warnings) = data.prepare(params.zero_replacement, params.tolerance);
    warnings.extend(prep_warnings);

    Ok(PreparedInput {
        data,
        tree,
        covariate,
        warnings,
    })
}

/// The greedy factorization state machine.
pub struct FactorizationLoop {
    params: FactorizationParams,
    tree: PhyloTree,
    enumerator: GroupEnumerator,
    design: DesignMatrix,
    regression: Box<dyn RegressionModel>,
    prepared: CompositionMatrix,
    current: CompositionMatrix,
    state: PartitionState,
    factors: Vec<Factor>,
    warnings: Vec<NumericalWarning>,
    status: LoopStatus,
    total_variance: f64,
    telemetry: Option<Arc<TelemetryBlackboard>>,
}

impl FactorizationLoop {
    /// Set up a run with the Gaussian GLM.
    pub fn new(input: FactorizationInput, params: FactorizationParams) -> Result<Self> {
        Self::with_regression(input, params, Box::new(GaussianGlm))
    }

    pub fn with_regression(
        input: FactorizationInput,
        params: FactorizationParams,
        regression: Box<dyn RegressionModel>,
    ) -> Result<Self> {
        params.validate()?;
        let _span = info_span!("setup").entered();

        let PreparedInput {
            data,
            tree,
            covariate,
            warnings,
        } = reconcile(input, &params)?;

        let enumerator = GroupEnumerator::new(&tree)?;
        let design = DesignMatrix::build(&covariate, params.formula)?;
        let state = PartitionState::new(enumerator.splits());
        let total_variance = compositions::matrix_variance(&data.clr());

        info!(
            n_tips = tree.n_tips(),
            n_samples = data.n_samples(),
            n_edges = enumerator.splits().len(),
            objective = params.objective.name(),
            formula = %params.formula,
            "factorization ready"
        );

        Ok(Self {
            params,
            tree,
            enumerator,
            design,
            regression,
            prepared: data.clone(),
            current: data,
            state,
            factors: Vec::new(),
            warnings,
            status: LoopStatus::Running,
            total_variance,
            telemetry: None,
        })
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryBlackboard>) -> Self {
        telemetry.set_target_factors(self.params.n_factors);
        self.telemetry = Some(telemetry);
        self
    }

    pub fn status(&self) -> LoopStatus {
        self.status
    }

    pub fn state(&self) -> &PartitionState {
        &self.state
    }

    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }

    pub fn tree(&self) -> &PhyloTree {
        &self.tree
    }

    /// Current (residual) data.
    pub fn data(&self) -> &CompositionMatrix {
        &self.current
    }

    /// Run one iteration. No-op once the loop has terminated.
    pub fn step(&mut self, executor: &Executor<'_>) -> Result<LoopStatus> {
        if !self.status.is_running() {
            return Ok(self.status);
        }
        let iteration = self.factors.len() + 1;

        let groups = self.enumerator.enumerate(&self.state);
        if groups.is_empty() {
            info!(iteration, "no splittable atoms remain");
            self.status = LoopStatus::TerminatedByExhaustion;
            return Ok(self.status);
        }

        let _span = info_span!("iteration", iteration, n_groups = groups.len()).entered();
        if let Some(bb) = &self.telemetry {
            bb.begin_iteration(iteration, groups.len());
        }

        let ctx = EvaluationContext::new(
            &self.current,
            &self.design,
            self.regression.as_ref(),
            self.params.method,
            self.params.objective,
        );
        let mut evaluation = evaluate(&groups, &ctx, executor, self.telemetry.as_deref())?;
        let p_values = evaluation.p_values();

        if let Some(rule) = self.params.rule_at(StopTiming::BeforeCommit) {
            let decision = rule.evaluate(&p_values);
            if decision.stop {
                info!(iteration, ks = ?decision.ks, "stopping rule fired before commit");
                self.status = LoopStatus::TerminatedByRule;
                return Ok(self.status);
            }
        }

        let winner_idx = evaluation.winner;
        let candidate = evaluation.candidates.swap_remove(winner_idx);
        let group: &Group = &groups[winner_idx];
        let residual_variance = ctx.residual_variance(&candidate);
        let current_variance = compositions::matrix_variance(&ctx.clr_data);
        drop(ctx);

        if !candidate.fit.converged {
            self.warnings.push(
                NumericalWarning::NonConvergence {
                    iteration,
                    edge: group.edge,
                }
                .logged(),
            );
        }

        let basis = candidate.amalgamation.basis;
        let prediction = compositions::predicted_composition(&basis, &candidate.fit.fitted);
        self.state
            .apply_winner(group, basis.clone(), self.enumerator.splits())?;
        self.current = self.current.residual(&prediction);

        let explained_variance = if self.total_variance > 0.0 {
            (current_variance - residual_variance) / self.total_variance
        } else {
            0.0
        };
        let splits = self.enumerator.splits();
        let factor = Factor {
            iteration,
            edge: group.edge,
            group_a: FactorSide::new(&group.side_a, &self.tree, splits),
            group_b: FactorSide::new(&group.side_b, &self.tree, splits),
            score: candidate.score,
            residual_variance,
            explained_variance,
            fit: candidate.fit,
            basis,
        };
        info!(
            iteration,
            edge = %factor.edge,
            size_a = factor.group_a.tips.len(),
            size_b = factor.group_b.tips.len(),
            score = factor.score,
            p_value = factor.fit.p_value,
            explained_variance,
            "factor committed"
        );
        self.factors.push(factor);
        if let Some(bb) = &self.telemetry {
            bb.factor_committed();
        }

        if let Some(rule) = self.params.rule_at(StopTiming::AfterCommit) {
            let decision = rule.evaluate(&p_values);
            if decision.stop {
                info!(iteration, ks = ?decision.ks, "stopping rule fired after commit");
                self.status = LoopStatus::TerminatedByRule;
                return Ok(self.status);
            }
        }

        let n = self.factors.len();
        if self.params.n_factors.is_some_and(|target| n >= target) || n + 1 >= self.tree.n_tips() {
            debug!(factors = n, "factor count reached");
            self.status = LoopStatus::TerminatedByCount;
        }
        Ok(self.status)
    }

    /// Iterate until termination. The pool, if any, is released on every exit path.
    pub fn run(mut self, pool: Option<&mut WorkerPool>) -> Result<PhyloFactorization> {
        let _span = info_span!("factorization", n_tips = self.tree.n_tips()).entered();
        if let Some(bb) = &self.telemetry {
            bb.set_stage(Stage::Factoring);
        }

        let mut lease = PoolLease::new(pool);
        while self.status.is_running() {
            let executor = lease.executor()?;
            self.step(&executor)?;
        }
        drop(lease);

        info!(
            factors = self.factors.len(),
            status = ?self.status,
            "factorization finished"
        );
        Ok(self.finish())
    }

    fn finish(self) -> PhyloFactorization {
        let splits = self.enumerator.splits();
        let atoms = self
            .state
            .atoms()
            .iter()
            .map(|atom| {
                let tips = atom.tip_indices();
                AtomSummary {
                    labels: tips.iter().map(|&t| self.tree.tip_labels()[t].clone()).collect(),
                    clade: CladeKind::of(&tips, splits),
                    tips,
                }
            })
            .collect();

        PhyloFactorization {
            status: self.status,
            atoms,
            atom_size_frequencies: self.state.atom_size_frequencies(),
            basis: self.state.basis_matrix(),
            warnings: self.warnings,
            data: self.prepared,
            residual_data: self.current,
            tree: self.tree.to_newick(),
            tip_labels: self.tree.tip_labels().to_vec(),
            total_variance: self.total_variance,
            factors: self.factors,
            params: self.params,
        }
    }
}

/// Set up and run a factorization in one call.
pub fn factorize(
    input: FactorizationInput,
    params: FactorizationParams,
    pool: Option<&mut WorkerPool>,
) -> Result<PhyloFactorization> {
    FactorizationLoop::new(input, params)?.run(pool)
}
