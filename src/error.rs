//! # Centralized Error Handling
//!
//! Unified error types for the entire crate using `thiserror`, plus the
//! non-fatal [`NumericalWarning`] records that travel with a finished run.

use serde::Serialize;
use thiserror::Error;

use crate::tree::EdgeId;

/// Main error type for phylofactor operations
#[derive(Error, Debug)]
pub enum PhyloFactorError {
    /// I/O errors (file missing, permission denied, read/write failures)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid inputs detected before the loop starts (dimension mismatch,
    /// taxa absent from the tree, unsupported method)
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Tree cannot be reduced to an unrooted bifurcating topology
    #[error("Topology error: {message}")]
    Topology { message: String },

    /// Malformed Newick input
    #[error("Newick error at byte {offset}: {message}")]
    Newick { offset: usize, message: String },

    /// Table parse errors
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Worker pool could not be built or a worker task failed
    #[error("Worker pool error: {message}")]
    WorkerPool { message: String },

    /// Configuration errors (invalid CLI arguments)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Report serialization failures
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Broken internal invariants (winner outside every atom, etc.)
    #[error("Algorithm error: {message}")]
    Algorithm { message: String },
}

/// Type alias for Results using PhyloFactorError
pub type Result<T> = std::result::Result<T, PhyloFactorError>;

impl PhyloFactorError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a topology error
    pub fn topology(message: impl Into<String>) -> Self {
        Self::Topology {
            message: message.into(),
        }
    }

    /// Create a Newick parse error at a byte offset
    pub fn newick(offset: usize, message: impl Into<String>) -> Self {
        Self::Newick {
            offset,
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// Create a worker pool error
    pub fn worker_pool(message: impl Into<String>) -> Self {
        Self::WorkerPool {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an algorithm error
    pub fn algorithm(message: impl Into<String>) -> Self {
        Self::Algorithm {
            message: message.into(),
        }
    }

    /// Validation error for a method the crate names but does not implement
    pub fn unsupported_method(method: &str) -> Self {
        Self::validation(format!(
            "amalgamation method '{}' is not supported; use 'ILR'",
            method
        ))
    }
}

/// Non-fatal numerical events. Recorded on the run and logged; never abort the loop.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NumericalWarning {
    #[error("{cells} zero cells in {columns} samples were replaced before closure")]
    ZerosReplaced { cells: usize, columns: usize },

    #[error("{columns} sample columns did not sum to 1 (max deviation {max_deviation:.3e}) and were renormalized")]
    ColumnsRenormalized { columns: usize, max_deviation: f64 },

    #[error("regression did not converge at iteration {iteration} for edge {edge}")]
    NonConvergence { iteration: usize, edge: EdgeId },

    #[error("rooted tree was unrooted before factorization")]
    UnrootedTree,

    #[error("{dropped} tree tips absent from the data were pruned")]
    TipsPruned { dropped: usize },

    #[error("{nodes} internal nodes with a single child were suppressed")]
    UnaryNodesSuppressed { nodes: usize },
}

impl NumericalWarning {
    /// Emit the warning through `tracing` and hand it back for collection.
    pub fn logged(self) -> Self {
        tracing::warn!("{}", self);
        self
    }
}
