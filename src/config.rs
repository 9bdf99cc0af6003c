//! # Configuration
//!
//! CLI argument parsing and validation.
//!
//! ## Stopping
//! - `--stop-early`: KS rule checked before committing; the triggering factor is discarded
//! - `--stop-late`: KS rule checked after committing; the triggering factor is kept
//! - neither flag and no `--nfactors`: `--stop-early` is implied
//! - `--nfactors` alone: run exactly that many factors (or until exhaustion)
//!
//! ## Example CLI
//! ```bash
//! phylofactor --data otus.tsv --tree tree.nwk --covariate ph.tsv --out result.json --nthreads 8
//! ```

use std::path::PathBuf;

use clap::Parser;

use crate::error::{PhyloFactorError, Result};
use crate::model::amalgamation::AmalgamationMethod;
use crate::model::objective::Objective;
use crate::model::parameters::FactorizationParams;
use crate::model::regression::Formula;
use crate::model::stopping::{StopRule, StopTiming};
use crate::utils::threading::PoolConfig;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "phylofactor",
    version,
    about = "Iterative phylogenetic factorization of compositional data"
)]
pub struct Config {
    /// Data table (TSV, taxa x samples)
    #[arg(long)]
    pub data: PathBuf,

    /// Phylogeny in Newick format
    #[arg(long)]
    pub tree: PathBuf,

    /// Covariate table (TSV: sample, value)
    #[arg(long)]
    pub covariate: PathBuf,

    /// Output report (JSON)
    #[arg(long)]
    pub out: PathBuf,

    /// Number of factors to extract
    #[arg(long)]
    pub nfactors: Option<usize>,

    /// Objective: 'var' (residual variance) or 'F' (F-statistic)
    #[arg(long, default_value = "var")]
    pub choice: String,

    /// Amalgamation method
    #[arg(long, default_value = "ILR")]
    pub method: String,

    /// Regress on a polynomial of the covariate of this degree
    #[arg(long)]
    pub polynomial_degree: Option<usize>,

    /// Stop when candidate p-values look uniform, discarding the last factor
    #[arg(long, conflicts_with = "stop_late")]
    pub stop_early: bool,

    /// Stop when candidate p-values look uniform, keeping the last factor
    #[arg(long)]
    pub stop_late: bool,

    /// KS p-value above which the stopping rule fires
    #[arg(long, default_value_t = StopRule::DEFAULT_KS_THRESHOLD)]
    pub ks_threshold: f64,

    /// Zeros are replaced by this fraction of their sample's smallest positive value
    #[arg(long, default_value_t = 0.65)]
    pub zero_replacement: f64,

    /// Samples whose sum deviates from 1 by more than this are renormalized
    #[arg(long, default_value_t = 1e-10)]
    pub tolerance: f64,

    /// Worker threads (default: all cores)
    #[arg(long)]
    pub nthreads: Option<usize>,

    /// Iterations before the worker pool is rebuilt
    #[arg(long)]
    pub pool_age: Option<usize>,

    /// Hierarchical timing output
    #[arg(long)]
    pub profile: bool,

    /// Periodic progress heartbeat on stderr
    #[arg(long)]
    pub progress: bool,
}

impl Config {
    pub fn parse_and_validate() -> Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (flag, path) in [
            ("--data", &self.data),
            ("--tree", &self.tree),
            ("--covariate", &self.covariate),
        ] {
            if !path.exists() {
                return Err(PhyloFactorError::config(format!(
                    "{} file not found: {}",
                    flag,
                    path.display()
                )));
            }
        }
        if self.nthreads == Some(0) {
            return Err(PhyloFactorError::config("--nthreads must be positive"));
        }
        if self.pool_age == Some(0) {
            return Err(PhyloFactorError::config("--pool-age must be positive"));
        }
        self.params()?.validate()
    }

    pub fn nthreads(&self) -> usize {
        self.nthreads.unwrap_or_else(|| PoolConfig::default().n_threads)
    }

    /// `None` when a single thread is requested.
    pub fn pool_config(&self) -> Option<PoolConfig> {
        let n_threads = self.nthreads();
        (n_threads > 1).then(|| PoolConfig {
            n_threads,
            max_age: self.pool_age.unwrap_or(usize::MAX),
        })
    }

    pub fn stop_rule(&self) -> Option<StopRule> {
        let timing = if self.stop_late {
            StopTiming::AfterCommit
        } else if self.stop_early || self.nfactors.is_none() {
            StopTiming::BeforeCommit
        } else {
            return None;
        };
        Some(StopRule::KolmogorovSmirnov {
            threshold: self.ks_threshold,
            timing,
        })
    }

    pub fn params(&self) -> Result<FactorizationParams> {
        let formula = match self.polynomial_degree {
            None => Formula::Linear,
            Some(0) => {
                return Err(PhyloFactorError::config("--polynomial-degree must be positive"));
            }
            Some(degree) => Formula::Polynomial { degree },
        };
        Ok(FactorizationParams {
            objective: self.choice.parse::<Objective>()?,
            method: self.method.parse::<AmalgamationMethod>()?,
            formula,
            n_factors: self.nfactors,
            stop_rule: self.stop_rule(),
            zero_replacement: self.zero_replacement,
            tolerance: self.tolerance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Config {
        let mut args = vec![
            "phylofactor",
            "--data",
            "d.tsv",
            "--tree",
            "t.nwk",
            "--covariate",
            "x.tsv",
            "--out",
            "out.json",
        ];
        args.extend_from_slice(extra);
        Config::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_default_stop_rule() {
        let config = parse(&[]);
        assert_eq!(config.stop_rule(), Some(StopRule::ks(StopTiming::BeforeCommit)));

        let config = parse(&["--nfactors", "3"]);
        assert_eq!(config.stop_rule(), None);

        let config = parse(&["--nfactors", "3", "--stop-late", "--ks-threshold", "0.05"]);
        assert_eq!(
            config.stop_rule(),
            Some(StopRule::KolmogorovSmirnov {
                threshold: 0.05,
                timing: StopTiming::AfterCommit
            })
        );
    }

    #[test]
    fn test_stop_flags_conflict() {
        let result = Config::try_parse_from([
            "phylofactor", "--data", "d", "--tree", "t", "--covariate", "x", "--out", "o",
            "--stop-early", "--stop-late",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_params_conversion() {
        let params = parse(&["--choice", "F", "--polynomial-degree", "2"]).params().unwrap();
        assert_eq!(params.objective, Objective::FStatistic);
        assert_eq!(params.formula, Formula::Polynomial { degree: 2 });

        assert!(parse(&["--method", "add"]).params().unwrap().validate().is_err());
        assert!(parse(&["--choice", "aic"]).params().is_err());
        assert!(parse(&["--polynomial-degree", "0"]).params().is_err());
    }

    #[test]
    fn test_pool_config() {
        assert!(parse(&["--nthreads", "1"]).pool_config().is_none());
        let pool = parse(&["--nthreads", "4", "--pool-age", "10"]).pool_config().unwrap();
        assert_eq!(pool.n_threads, 4);
        assert_eq!(pool.max_age, 10);
    }

    #[test]
    fn test_missing_files_rejected() {
        assert!(matches!(parse(&[]).validate(), Err(PhyloFactorError::Config { .. })));
    }
}
