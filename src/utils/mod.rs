//! Shared helpers: convergence checks and object lifecycle.

pub mod convergence;
pub mod lifecycle;
