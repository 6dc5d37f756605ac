//! Krylov solver interfaces.

use crate::core::traits::KrylovVector;
use crate::error::KError;
use crate::preconditioner::Preconditioner;
use crate::utils::convergence::SolveStats;

/// Common interface for iterative solvers.
pub trait LinearSolver<M, V> {
    /// Prepare the preconditioner and the solver workspace for `a`.
    fn setup(&mut self, a: &M, pc: Option<&mut dyn Preconditioner<M, V>>, b: &V) -> Result<(), KError>;
    /// Solve A·x = b, writing result into `x`.
    /// Returns iteration stats (including convergence info).
    fn solve(
        &mut self,
        a: &M,
        pc: Option<&mut dyn Preconditioner<M, V>>,
        b: &V,
        x: &mut V,
    ) -> Result<SolveStats, KError>;
}

/// z = M⁻¹ r, or z = r without a preconditioner.
pub(crate) fn precondition<M, V, P>(pc: Option<&mut P>, a: &M, r: &V, z: &mut V) -> Result<(), KError>
where
    V: KrylovVector,
    P: Preconditioner<M, V> + ?Sized,
{
    match pc {
        Some(pc) => pc.apply(a, r, z),
        None => {
            z.copy_from(r);
            Ok(())
        }
    }
}

pub mod gmres;
pub use gmres::{GmresSolver, SolverState};
