//! Solver and preconditioner contexts.
//!
//! - [`ksp_context`]: `KspContext`, the GMRES façade driven by binding layers.
//! - [`pc_context`]: `StructPc`, the run-time selected preconditioner.

pub mod ksp_context;
pub use ksp_context::KspContext;
pub mod pc_context;
pub use pc_context::StructPc;
