//! # Phylofactor Library
//!
//! Greedy phylogenetic factorization of compositional data. Each iteration
//! finds the tree edge whose isometric log-ratio contrast is best explained
//! by a covariate, records it as a factor, and divides its prediction out of
//! the data before searching again.
//!
//! ## Modules
//! - `config`: CLI argument parsing and validation
//! - `data`: Composition table and covariate
//! - `error`: Error types, result alias and numerical warnings
//! - `io`: TSV tables, Newick files, JSON report
//! - `model`: Compositions, amalgamation, regression, scoring, partition, stopping
//! - `pipelines`: The factorization loop and its output artifact
//! - `tree`: Phylogeny, Newick parser, edge bipartitions
//! - `utils`: Worker pool and telemetry

pub mod config;
pub mod data;
pub mod error;
pub mod io;
pub mod model;
pub mod pipelines;
pub mod tree;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use data::{CompositionMatrix, IndependentVariable};
pub use error::{NumericalWarning, PhyloFactorError, Result};
pub use model::{AmalgamationMethod, FactorizationParams, Formula, Objective, StopRule, StopTiming};
pub use pipelines::{factorize, FactorizationInput, FactorizationLoop, LoopStatus, PhyloFactorization};
pub use tree::{EdgeId, PhyloTree};
pub use utils::threading::{PoolConfig, WorkerPool};
