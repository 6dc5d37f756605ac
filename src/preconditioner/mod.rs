//! Preconditioners for structured linear systems.
//!
//! This module defines the Preconditioner trait and the structured variants:
//! point Jacobi, box-local ILU(0) and an aggregation multigrid V-cycle.

use crate::core::traits::KrylovVector;
use crate::error::KError;

/// A preconditioner M ≈ A⁻¹.
///
/// The operator is passed to `apply` as well as `setup`; a preconditioner
/// borrows the matrix for the duration of each call and never owns it.
pub trait Preconditioner<M, V> {
    /// Optionally: setup/factorize from A
    fn setup(&mut self, _a: &M) -> Result<(), KError> {
        Ok(())
    }
    /// Apply M⁻¹ to r, writing z = M⁻¹ r
    fn apply(&mut self, a: &M, r: &V, z: &mut V) -> Result<(), KError>;
    /// Release cached structures; a later `apply` needs a new `setup`.
    fn destroy(&mut self) {}
}

/// M = I.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl<M, V: KrylovVector> Preconditioner<M, V> for Identity {
    fn apply(&mut self, _a: &M, r: &V, z: &mut V) -> Result<(), KError> {
        z.copy_from(r);
        Ok(())
    }
}

pub mod ilu;
pub mod jacobi;
pub mod multigrid;

pub use ilu::StructIlu0;
pub use jacobi::StructJacobi;
pub use multigrid::StructMultigrid;

/// Unified preconditioner enum for all supported types.
pub use crate::context::pc_context::StructPc;
