//! # Pipeline Module
//!
//! High-level orchestration of a phylofactorization run. Reconciles inputs,
//! drives the iteration loop and assembles the output artifact.

pub mod factorization;

pub use factorization::{
    factorize, Factor, FactorizationInput, FactorizationLoop, LoopStatus, PhyloFactorization,
};
