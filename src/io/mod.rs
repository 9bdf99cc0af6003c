//! # I/O Module
//!
//! File boundaries of the CLI: TSV data and covariate tables, Newick trees,
//! and the JSON report. The library itself works on in-memory types only.

pub mod table;

pub use table::{read_covariate_table, read_data_table, read_tree, write_report};
