//! # Model Module
//!
//! The statistical engine of one factorization iteration.
//!
//! ## Per-iteration flow
//! ```text
//! PartitionState ──groups──▶ candidate Groups
//!        ▲                        │ amalgamation (ILR contrast)
//!        │                        │ regression (Gaussian GLM)
//!        │                        ▼
//!  apply_winner ◀──winner── objective (var / F)
//! ```
//!
//! - `compositions`: closure, log, clr, variances
//! - `amalgamation`: ILR basis vectors and amalgamated series
//! - `regression`: design matrices and the regression service
//! - `groups`: candidate bipartitions from the tree
//! - `objective`: scoring and winner selection
//! - `partition`: atoms, sub-trees and the accumulated basis
//! - `stopping`: KS stopping rule
//! - `parameters`: run parameters

pub mod amalgamation;
pub mod compositions;
pub mod groups;
pub mod objective;
pub mod parameters;
pub mod partition;
pub mod regression;
pub mod stopping;

pub use amalgamation::AmalgamationMethod;
pub use groups::{Group, GroupEnumerator};
pub use objective::Objective;
pub use parameters::FactorizationParams;
pub use partition::{Atom, PartitionState};
pub use regression::{DesignMatrix, Formula, GaussianGlm, RegressionFit, RegressionModel};
pub use stopping::{StopRule, StopTiming};
