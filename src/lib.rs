//! kryst-struct: stencil-based structured-grid linear systems with a
//! PETSc-style PC/KSP interface.
//!
//! This crate provides distributed structured grids, stencil matrices with
//! halo exchange, structured preconditioners (Jacobi, ILU(0), multigrid) and
//! restarted GMRES, with shared memory parallelism over boxes (rayon) and
//! distributed memory parallelism across ranks (threads or MPI).

pub mod parallel;

pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod grid;
pub mod matrix;
pub mod preconditioner;
pub mod solver;
pub mod utils;

// Re-exports for convenience
pub use config::*;
pub use context::*;
pub use core::traits::{KrylovVector, MatVec, Real};
pub use error::*;
pub use grid::*;
pub use matrix::*;
pub use parallel::{Comm, ReduceOp, SerialComm, ThreadComm};
pub use preconditioner::{Identity, Preconditioner, StructIlu0, StructJacobi, StructMultigrid};
pub use solver::*;

// Re-export SolveStats at the crate root for convenience
pub use utils::convergence::{Outcome, SolveStats};
