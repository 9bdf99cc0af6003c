use std::collections::BTreeSet;

use nalgebra::DMatrix;
use phylofactor::model::compositions;
use phylofactor::pipelines::FactorizationInput;
use phylofactor::{
    factorize, CompositionMatrix, FactorizationParams, IndependentVariable, LoopStatus,
    NumericalWarning, Objective, PhyloFactorization, PhyloTree, PoolConfig, WorkerPool,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// --- Helpers ---

/// Random unrooted bifurcating tree plus log-normal-ish abundances.
/// `effects` inflate a set of tips in the samples of one covariate group.
struct SyntheticCommunityBuilder {
    n_tips: usize,
    n_samples: usize,
    seed: u64,
    newick: Option<String>,
    effects: Vec<(Vec<usize>, usize, f64)>,
    noise: f64,
    zero_cells: Vec<(usize, usize)>,
}

impl SyntheticCommunityBuilder {
    fn new(n_tips: usize, n_samples: usize) -> Self {
        Self {
            n_tips,
            n_samples,
            seed: 42,
            newick: None,
            effects: Vec::new(),
            noise: 0.1,
            zero_cells: Vec::new(),
        }
    }

    fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn newick(mut self, newick: &str) -> Self {
        self.newick = Some(newick.to_string());
        self
    }

    /// Multiply `tips` by `fold` in every sample of covariate group `group`.
    fn inflate(mut self, tips: &[usize], group: usize, fold: f64) -> Self {
        self.effects.push((tips.to_vec(), group, fold));
        self
    }

    fn noise(mut self, noise: f64) -> Self {
        self.noise = noise;
        self
    }

    fn zero(mut self, tip: usize, sample: usize) -> Self {
        self.zero_cells.push((tip, sample));
        self
    }

    fn label(tip: usize) -> String {
        format!("t{}", tip + 1)
    }

    fn random_subtree(tips: &[usize], rng: &mut StdRng) -> String {
        if tips.len() == 1 {
            return Self::label(tips[0]);
        }
        let cut = rng.gen_range(1..tips.len());
        format!(
            "({},{})",
            Self::random_subtree(&tips[..cut], rng),
            Self::random_subtree(&tips[cut..], rng)
        )
    }

    fn random_newick(&self, rng: &mut StdRng) -> String {
        let tips: Vec<usize> = (0..self.n_tips).collect();
        let first = rng.gen_range(1..self.n_tips - 1);
        let second = rng.gen_range(first + 1..self.n_tips);
        format!(
            "({},{},{});",
            Self::random_subtree(&tips[..first], rng),
            Self::random_subtree(&tips[first..second], rng),
            Self::random_subtree(&tips[second..], rng)
        )
    }

    fn group_of(&self, sample: usize) -> usize {
        usize::from(sample >= self.n_samples / 2)
    }

    fn build(self) -> FactorizationInput {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let newick = match &self.newick {
            Some(newick) => newick.clone(),
            None => self.random_newick(&mut rng),
        };

        let base: Vec<f64> = (0..self.n_tips).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let rows: Vec<Vec<f64>> = (0..self.n_tips)
            .map(|tip| {
                (0..self.n_samples)
                    .map(|sample| {
                        if self.zero_cells.contains(&(tip, sample)) {
                            return 0.0;
                        }
                        let mut value = (base[tip] + rng.gen_range(-self.noise..=self.noise)).exp();
                        for (tips, group, fold) in &self.effects {
                            if tips.contains(&tip) && self.group_of(sample) == *group {
                                value *= fold;
                            }
                        }
                        value
                    })
                    .collect()
            })
            .collect();

        let taxa = (0..self.n_tips).map(Self::label).collect();
        let samples = (0..self.n_samples).map(|s| format!("sample{}", s)).collect();
        let groups: Vec<String> = (0..self.n_samples)
            .map(|s| format!("group{}", self.group_of(s)))
            .collect();

        FactorizationInput {
            data: CompositionMatrix::from_rows(taxa, samples, &rows).expect("valid synthetic data"),
            tree: PhyloTree::from_newick(&newick).expect("valid synthetic tree"),
            covariate: IndependentVariable::categorical(&groups),
        }
    }
}

const SEVEN_TIPS: &str = "((t1,t2),(t3,(t4,t5)),(t6,t7));";

fn exact(n_factors: Option<usize>) -> FactorizationParams {
    FactorizationParams {
        n_factors,
        stop_rule: None,
        ..Default::default()
    }
}

fn two_clade_input(seed: u64) -> FactorizationInput {
    SyntheticCommunityBuilder::new(7, 20)
        .seed(seed)
        .newick(SEVEN_TIPS)
        .inflate(&[0, 1], 0, 4.0)
        .inflate(&[5, 6], 1, 4.0)
        .build()
}

fn label_set(labels: &[String]) -> BTreeSet<String> {
    labels.iter().cloned().collect()
}

fn clade(labels: &[&str]) -> BTreeSet<String> {
    labels.iter().map(|s| s.to_string()).collect()
}

fn identified_clades(run: &PhyloFactorization) -> Vec<(BTreeSet<String>, BTreeSet<String>)> {
    run.factors
        .iter()
        .map(|f| (label_set(&f.group_a.labels), label_set(&f.group_b.labels)))
        .collect()
}

fn assert_finds_both_clades(run: &PhyloFactorization) {
    let left = clade(&["t1", "t2"]);
    let right = clade(&["t6", "t7"]);
    let found = identified_clades(run);
    for target in [&left, &right] {
        assert!(
            found.iter().any(|(a, b)| a == target || b == target),
            "clade {:?} not identified in {:?}",
            target,
            found
        );
    }
}

// --- Scenarios ---

#[test]
fn test_var_objective_finds_inflated_clades() {
    let run = factorize(two_clade_input(7), exact(Some(2)), None).unwrap();
    assert_eq!(run.n_factors(), 2);
    assert_eq!(run.status, LoopStatus::TerminatedByCount);
    assert!(!run.terminated_by_rule());
    assert_finds_both_clades(&run);
}

#[test]
fn test_f_objective_agrees_with_var() {
    let params = FactorizationParams {
        objective: Objective::FStatistic,
        ..exact(Some(2))
    };
    let by_f = factorize(two_clade_input(7), params, None).unwrap();
    let by_var = factorize(two_clade_input(7), exact(Some(2)), None).unwrap();
    assert_eq!(by_f.n_factors(), 2);
    assert_finds_both_clades(&by_f);

    let f_edges: BTreeSet<_> = by_f.factors.iter().map(|f| f.edge).collect();
    let var_edges: BTreeSet<_> = by_var.factors.iter().map(|f| f.edge).collect();
    assert_eq!(f_edges, var_edges);
}

#[test]
fn test_identical_samples_stop_immediately() {
    let tree = PhyloTree::from_newick("((a,b),(c,d));").unwrap();
    let taxa: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
    let samples: Vec<String> = (0..6).map(|s| format!("s{}", s)).collect();
    let rows: Vec<Vec<f64>> = [0.1, 0.2, 0.3, 0.4].iter().map(|&v| vec![v; 6]).collect();
    let input = FactorizationInput {
        data: CompositionMatrix::from_rows(taxa, samples, &rows).unwrap(),
        tree,
        covariate: IndependentVariable::Continuous((0..6).map(|s| s as f64).collect()),
    };

    let run = factorize(input, FactorizationParams::default(), None).unwrap();
    assert!(run.terminated_by_rule());
    assert_eq!(run.n_factors(), 0);
    assert_eq!(run.atoms.len(), 1);
    assert_eq!(run.basis.ncols(), 0);
}

#[test]
fn test_zeros_are_replaced_and_reported() {
    let input = SyntheticCommunityBuilder::new(6, 10).zero(2, 3).zero(4, 3).build();
    let raw = input.data.values()[(2, 3)];
    assert_eq!(raw, 0.0);

    let run = factorize(input, exact(Some(1)), None).unwrap();
    assert!(run
        .warnings
        .iter()
        .any(|w| matches!(w, NumericalWarning::ZerosReplaced { cells: 2, columns: 1 })));

    let row = run.data.taxon_index("t3").unwrap();
    assert!(run.data.values()[(row, 3)] > 0.0);
    for column in run.data.values().column_iter() {
        assert!((column.sum() - 1.0).abs() < 1e-12);
    }
}

// --- Properties ---

#[test]
fn test_full_run_bounds_and_partition() {
    for (n_tips, seed) in [(3, 1), (4, 2), (5, 3), (8, 4), (11, 5), (16, 6)] {
        let input = SyntheticCommunityBuilder::new(n_tips, 12).seed(seed).build();
        let run = factorize(input, exact(None), None).unwrap();

        assert!(run.n_factors() <= n_tips - 1);
        assert_eq!(run.atoms.len(), run.n_factors() + 1);
        assert_eq!(run.basis.ncols(), run.n_factors());
        assert_eq!(run.basis.nrows(), n_tips);

        let mut seen = vec![false; n_tips];
        for atom in &run.atoms {
            for &tip in &atom.tips {
                assert!(!seen[tip], "tip {} in two atoms", tip);
                seen[tip] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
        assert_eq!(run.atom_size_frequencies.values().sum::<usize>(), run.atoms.len());
    }
}

#[test]
fn test_basis_columns_are_zero_sum_contrasts() {
    let input = SyntheticCommunityBuilder::new(9, 16).seed(11).build();
    let run = factorize(input, exact(None), None).unwrap();

    for factor in &run.factors {
        let atom: Vec<usize> = factor
            .group_a
            .tips
            .iter()
            .chain(&factor.group_b.tips)
            .copied()
            .collect();
        let inside: f64 = atom.iter().map(|&t| factor.basis[t]).sum();
        assert!(inside.abs() < 1e-12);
        for tip in 0..run.tip_labels.len() {
            if !atom.contains(&tip) {
                assert_eq!(factor.basis[tip], 0.0);
            }
        }
        assert!((factor.basis.norm() - 1.0).abs() < 1e-12);
    }

    let gram = run.basis.transpose() * &run.basis;
    assert!((gram - DMatrix::identity(run.n_factors(), run.n_factors())).amax() < 1e-10);
}

#[test]
fn test_projection_recovers_fitted_values() {
    let run = factorize(two_clade_input(3), exact(Some(3)), None).unwrap();
    for (k, factor) in run.factors.iter().enumerate() {
        let prediction = compositions::predicted_composition(&factor.basis, &factor.fit.fitted);
        let coords = run.project(&prediction);
        for j in 0..factor.fit.fitted.len() {
            assert!((coords[(k, j)] - factor.fit.fitted[j]).abs() < 1e-9);
            for other in (0..run.n_factors()).filter(|&o| o != k) {
                assert!(coords[(other, j)].abs() < 1e-9);
            }
        }
    }
}

#[test]
fn test_rerun_is_deterministic() {
    let first = factorize(two_clade_input(9), exact(Some(4)), None).unwrap();
    let second = factorize(two_clade_input(9), exact(Some(4)), None).unwrap();
    assert_eq!(first.n_factors(), second.n_factors());
    for (a, b) in first.factors.iter().zip(&second.factors) {
        assert_eq!(a.edge, b.edge);
        assert_eq!(a.group_a.tips, b.group_a.tips);
        assert_eq!(a.score.to_bits(), b.score.to_bits());
    }
}

#[test]
fn test_pool_matches_sequential() {
    let sequential = factorize(two_clade_input(5), exact(None), None).unwrap();

    let mut pool = WorkerPool::new(PoolConfig {
        n_threads: 3,
        max_age: 2,
    })
    .unwrap();
    let parallel = factorize(two_clade_input(5), exact(None), Some(&mut pool)).unwrap();
    assert!(!pool.is_active());
    assert!(pool.generation() >= 2);

    assert_eq!(sequential.n_factors(), parallel.n_factors());
    for (a, b) in sequential.factors.iter().zip(&parallel.factors) {
        assert_eq!(a.edge, b.edge);
        assert_eq!(a.score.to_bits(), b.score.to_bits());
    }
    assert_eq!(sequential.basis, parallel.basis);
}

#[test]
fn test_default_rule_stops_on_noise() {
    let input = SyntheticCommunityBuilder::new(12, 30).seed(21).noise(0.5).build();
    let run = factorize(input, FactorizationParams::default(), None).unwrap();
    assert!(run.n_factors() < 11);
    assert!(run.terminated_by_rule());
}

#[test]
fn test_explained_variance_is_a_fraction() {
    let run = factorize(two_clade_input(13), exact(Some(2)), None).unwrap();
    let total: f64 = run.factors.iter().map(|f| f.explained_variance).sum();
    assert!(run.factors[0].explained_variance > 0.0);
    assert!(total <= 1.0 + 1e-9);
    assert!((run.total_variance - compositions::matrix_variance(&run.data.clr())).abs() < 1e-12);
}
