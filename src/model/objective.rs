//! # Objective Evaluation
//!
//! Scores every candidate group of an iteration and picks the winner.
//!
//! - `var`: variance of `clr(data) - clr(prediction)` over all parts and
//!   samples, where the prediction is the inverse projection of the fitted
//!   amalgamation. Lowest wins.
//! - `F`: regression F-statistic. Highest wins.
//!
//! Ties go to the first candidate in enumeration order. NaN scores never
//! beat a finite score.

use nalgebra::DMatrix;
use serde::Serialize;

use crate::data::CompositionMatrix;
use crate::error::{PhyloFactorError, Result};
use crate::model::amalgamation::{amalgamate, Amalgamation, AmalgamationMethod};
use crate::model::compositions;
use crate::model::groups::Group;
use crate::model::regression::{DesignMatrix, RegressionFit, RegressionModel};
use crate::utils::telemetry::TelemetryBlackboard;
use crate::utils::threading::Executor;

/// Winner selection criterion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum Objective {
    #[default]
    #[serde(rename = "var")]
    ResidualVariance,
    #[serde(rename = "F")]
    FStatistic,
}

impl Objective {
    pub fn name(self) -> &'static str {
        match self {
            Self::ResidualVariance => "var",
            Self::FStatistic => "F",
        }
    }

    fn improves(self, candidate: f64, best: f64) -> bool {
        match self {
            Self::ResidualVariance => candidate < best,
            Self::FStatistic => candidate > best,
        }
    }
}

impl std::str::FromStr for Objective {
    type Err = PhyloFactorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "var" => Ok(Self::ResidualVariance),
            "F" => Ok(Self::FStatistic),
            other => Err(PhyloFactorError::validation(format!(
                "unknown objective '{}', expected 'var' or 'F'",
                other
            ))),
        }
    }
}

/// Read-only inputs shared by every group evaluation in an iteration.
pub struct EvaluationContext<'a> {
    pub log_data: DMatrix<f64>,
    pub clr_data: DMatrix<f64>,
    pub design: &'a DesignMatrix,
    pub regression: &'a dyn RegressionModel,
    pub method: AmalgamationMethod,
    pub objective: Objective,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(
        data: &CompositionMatrix,
        design: &'a DesignMatrix,
        regression: &'a dyn RegressionModel,
        method: AmalgamationMethod,
        objective: Objective,
    ) -> Self {
        let log_data = data.log();
        let clr_data = data.clr();
        Self {
            log_data,
            clr_data,
            design,
            regression,
            method,
            objective,
        }
    }

    /// Residual variance of a candidate, computed on demand for `F` runs.
    pub fn residual_variance(&self, candidate: &CandidateScore) -> f64 {
        if candidate.residual_variance.is_nan() {
            compositions::residual_variance(
                &self.clr_data,
                &candidate.amalgamation.basis,
                &candidate.fit.fitted,
            )
        } else {
            candidate.residual_variance
        }
    }
}

/// Amalgamation, fit and score of one candidate group.
#[derive(Clone, Debug)]
pub struct CandidateScore {
    pub score: f64,
    /// NaN unless the objective is `var`
    pub residual_variance: f64,
    pub amalgamation: Amalgamation,
    pub fit: RegressionFit,
}

/// Scores of one iteration, in enumeration order.
#[derive(Clone, Debug)]
pub struct Evaluation {
    pub candidates: Vec<CandidateScore>,
    pub winner: usize,
}

impl Evaluation {
    pub fn p_values(&self) -> Vec<f64> {
        self.candidates.iter().map(|c| c.fit.p_value).collect()
    }
}

/// Amalgamate, regress and score one group.
pub fn score_group(group: &Group, ctx: &EvaluationContext<'_>) -> Result<CandidateScore> {
    let amalgamation = amalgamate(ctx.method, group, &ctx.log_data)?;
    let fit = ctx.regression.fit(&amalgamation.series, ctx.design);

    let (score, residual_variance) = match ctx.objective {
        Objective::ResidualVariance => {
            let rv = compositions::residual_variance(&ctx.clr_data, &amalgamation.basis, &fit.fitted);
            (rv, rv)
        }
        Objective::FStatistic => (fit.f_statistic, f64::NAN),
    };

    Ok(CandidateScore {
        score,
        residual_variance,
        amalgamation,
        fit,
    })
}

/// Index of the best score; first extremum wins ties. `None` only for an
/// empty slice. If every score is NaN the first candidate wins.
pub fn select_winner(objective: Objective, scores: &[f64]) -> Option<usize> {
    if scores.is_empty() {
        return None;
    }
    let mut best: Option<(usize, f64)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, current)) if !objective.improves(score, current) => {}
            _ => best = Some((i, score)),
        }
    }
    Some(best.map(|(i, _)| i).unwrap_or(0))
}

/// Score all groups with the given executor and select the winner.
pub fn evaluate(
    groups: &[Group],
    ctx: &EvaluationContext<'_>,
    executor: &Executor<'_>,
    telemetry: Option<&TelemetryBlackboard>,
) -> Result<Evaluation> {
    let results = executor.map(groups, |group| {
        let result = score_group(group, ctx);
        if let Some(bb) = telemetry {
            bb.group_evaluated();
        }
        result
    });
    let candidates = results.into_iter().collect::<Result<Vec<_>>>()?;

    let scores: Vec<f64> = candidates.iter().map(|c| c.score).collect();
    let winner = select_winner(ctx.objective, &scores)
        .ok_or_else(|| PhyloFactorError::algorithm("no candidate groups to evaluate"))?;

    Ok(Evaluation { candidates, winner })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::IndependentVariable;
    use crate::model::groups::GroupEnumerator;
    use crate::model::partition::PartitionState;
    use crate::model::regression::{Formula, GaussianGlm};
    use crate::tree::PhyloTree;

    #[test]
    fn test_select_winner_ties_and_nan() {
        assert_eq!(select_winner(Objective::ResidualVariance, &[2.0, 1.0, 1.0]), Some(1));
        assert_eq!(select_winner(Objective::FStatistic, &[f64::NAN, 3.0, 3.0, 1.0]), Some(1));
        assert_eq!(select_winner(Objective::FStatistic, &[f64::NAN, f64::NAN]), Some(0));
        assert_eq!(select_winner(Objective::FStatistic, &[]), None);
        assert_eq!(select_winner(Objective::FStatistic, &[1.0, f64::INFINITY]), Some(1));
    }

    #[test]
    fn test_parse_objective() {
        assert_eq!("var".parse::<Objective>().unwrap(), Objective::ResidualVariance);
        assert_eq!("F".parse::<Objective>().unwrap(), Objective::FStatistic);
        assert!("f".parse::<Objective>().is_err());
    }

    /// Tip `a` is inflated in the second half of the samples.
    fn signal_fixture() -> (PhyloTree, CompositionMatrix, IndependentVariable) {
        let tree = PhyloTree::from_newick("((a,b),c,(d,e));").unwrap();
        let taxa: Vec<String> = tree.tip_labels().to_vec();
        let samples: Vec<String> = (0..8).map(|j| format!("s{}", j)).collect();
        let rows: Vec<Vec<f64>> = (0..5)
            .map(|i| {
                (0..8)
                    .map(|j| {
                        let jitter = 1.0 + 0.01 * ((i * 7 + j * 3) % 5) as f64;
                        let boost = if i == 0 && j >= 4 { 8.0 } else { 1.0 };
                        jitter * boost
                    })
                    .collect()
            })
            .collect();
        let data = CompositionMatrix::from_rows(taxa, samples, &rows).unwrap();
        let (data, _) = data.prepare(0.65, 1e-10);
        let x = IndependentVariable::Continuous((0..8).map(|j| if j >= 4 { 1.0 } else { 0.0 }).collect());
        (tree, data, x)
    }

    #[test]
    fn test_both_objectives_find_inflated_tip() {
        let (tree, data, x) = signal_fixture();
        let enumerator = GroupEnumerator::new(&tree).unwrap();
        let state = PartitionState::new(enumerator.splits());
        let groups = enumerator.enumerate(&state);
        let design = DesignMatrix::build(&x, Formula::Linear).unwrap();

        for objective in [Objective::ResidualVariance, Objective::FStatistic] {
            let ctx = EvaluationContext::new(&data, &design, &GaussianGlm, AmalgamationMethod::Ilr, objective);
            let evaluation = evaluate(&groups, &ctx, &Executor::Sequential, None).unwrap();
            let winner = &groups[evaluation.winner];
            assert!(
                winner.side_a == vec![0] || winner.side_b == vec![0],
                "{:?} picked {:?}",
                objective,
                winner
            );
            assert_eq!(evaluation.candidates.len(), groups.len());
        }
    }

    #[test]
    fn test_residual_variance_on_demand_matches_var_score() {
        let (tree, data, x) = signal_fixture();
        let enumerator = GroupEnumerator::new(&tree).unwrap();
        let state = PartitionState::new(enumerator.splits());
        let groups = enumerator.enumerate(&state);
        let design = DesignMatrix::build(&x, Formula::Linear).unwrap();

        let var_ctx = EvaluationContext::new(&data, &design, &GaussianGlm, AmalgamationMethod::Ilr, Objective::ResidualVariance);
        let f_ctx = EvaluationContext::new(&data, &design, &GaussianGlm, AmalgamationMethod::Ilr, Objective::FStatistic);
        let by_var = score_group(&groups[2], &var_ctx).unwrap();
        let by_f = score_group(&groups[2], &f_ctx).unwrap();
        assert!(by_f.residual_variance.is_nan());
        assert!((f_ctx.residual_variance(&by_f) - by_var.score).abs() < 1e-12);
    }
}
