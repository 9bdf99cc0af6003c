//! # Utilities Module
//!
//! ## Sub-modules
//! - `threading`: worker pool with an age budget, and the executor seam
//! - `telemetry`: atomic progress counters and the heartbeat thread

pub mod telemetry;
pub mod threading;
