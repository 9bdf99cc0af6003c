//! # Data Module
//!
//! In-memory inputs of a factorization run: the compositional table and the
//! per-sample covariate. Both are validated on construction; everything
//! downstream assumes positive, closed columns aligned with the covariate.

pub mod composition;
pub mod covariate;

pub use composition::CompositionMatrix;
pub use covariate::IndependentVariable;
