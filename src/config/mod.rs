//! Solver and preconditioner configuration.

pub mod options;
pub use options::{GmresOptions, PcOptions, PcType, SolverLogging};
