// Jacobi preconditioner implementation

use crate::core::traits::Real;
use crate::error::KError;
use crate::grid::StructGrid;
use crate::matrix::{StructMatrix, StructVector};
use crate::parallel::ReduceOp;
use crate::preconditioner::Preconditioner;
use std::rc::Rc;

/// Jacobi preconditioner: M⁻¹ = ω D⁻¹
#[derive(Debug, Clone)]
pub struct StructJacobi<T: Real = f64> {
    omega: f64,
    pub(crate) inv_diag: Vec<Vec<T>>,
    grid: Option<Rc<StructGrid>>,
}

impl<T: Real> StructJacobi<T> {
    /// new with empty state; user must call `setup`.
    pub fn new() -> Self {
        Self::with_omega(1.0)
    }

    pub fn with_omega(omega: f64) -> Self {
        Self { omega, inv_diag: Vec::new(), grid: None }
    }
}

impl<T: Real> Default for StructJacobi<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// `1 / a_ii` per local box. Collective: every rank fails if any rank finds
/// a zero or non-finite diagonal.
pub(crate) fn inverse_diagonal<T: Real>(a: &StructMatrix<T>) -> Result<Vec<Vec<T>>, KError> {
    a.ensure_assembled()?;
    let diag = a.diagonal()?;
    let bad = diag.iter().flatten().any(|d| *d == T::zero() || !d.is_finite());
    let any_bad = a.grid().comm().all_reduce(if bad { 1.0 } else { 0.0 }, ReduceOp::Max)?;
    if any_bad > 0.0 {
        return Err(KError::SingularOperator("zero or non-finite diagonal entry".into()));
    }
    Ok(diag
        .into_iter()
        .map(|d| d.into_iter().map(|v| T::one() / v).collect())
        .collect())
}

impl<T: Real> Preconditioner<StructMatrix<T>, StructVector<T>> for StructJacobi<T> {
    fn setup(&mut self, a: &StructMatrix<T>) -> Result<(), KError> {
        self.destroy();
        let w = T::from_f64_lossy(self.omega);
        self.inv_diag = inverse_diagonal(a)?
            .into_iter()
            .map(|d| d.into_iter().map(|v| w * v).collect())
            .collect();
        self.grid = Some(Rc::clone(a.grid()));
        Ok(())
    }

    fn apply(&mut self, _a: &StructMatrix<T>, r: &StructVector<T>, z: &mut StructVector<T>) -> Result<(), KError> {
        let grid = self
            .grid
            .as_ref()
            .ok_or_else(|| KError::InvalidState("Jacobi preconditioner has not been set up".into()))?;
        if !r.same_grid(grid) || !z.same_grid(grid) {
            return Err(KError::InvalidState("vectors do not match the set-up operator".into()));
        }
        for ((zb, rb), inv) in z.boxes_mut().iter_mut().zip(r.boxes()).zip(&self.inv_diag) {
            for (g, i, len) in rb.interior_rows() {
                for t in 0..len {
                    zb.values[g + t] = inv[i + t] * rb.values[g + t];
                }
            }
        }
        Ok(())
    }

    fn destroy(&mut self) {
        self.inv_diag = Vec::new();
        self.grid = None;
    }
}
