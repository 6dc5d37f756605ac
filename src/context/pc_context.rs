//! Preconditioner selection for structured solves.
//!
//! [`StructPc`] is a tagged variant over every preconditioner this crate
//! provides for [`StructMatrix`]/[`StructVector`] operands. `setup`, `apply`
//! and `destroy` dispatch on the stored tag, so a solver holds one concrete
//! type whatever the user picked at run time.
//!
//! # Example
//!
//! ```rust,ignore
//! use kryst_struct::config::{PcOptions, PcType};
//! use kryst_struct::context::pc_context::StructPc;
//! let pc = StructPc::<f64>::from_options(&PcOptions::new(PcType::Multigrid));
//! ```

use crate::config::{PcOptions, PcType};
use crate::core::traits::{KrylovVector, Real};
use crate::error::KError;
use crate::matrix::{StructMatrix, StructVector};
use crate::preconditioner::{Preconditioner, StructIlu0, StructJacobi, StructMultigrid};

/// Unified preconditioner enum for all supported types.
pub enum StructPc<T: Real = f64> {
    /// z = r.
    Identity,
    /// Damped point Jacobi.
    Jacobi(StructJacobi<T>),
    /// Aggregation V-cycle; boxed, the hierarchy handle is large.
    Multigrid(Box<StructMultigrid<T>>),
    /// Box-local ILU(0).
    Ilu0(StructIlu0),
}

impl<T: Real> StructPc<T> {
    pub fn from_options(opts: &PcOptions) -> Self {
        match opts.pc_type {
            PcType::None => StructPc::Identity,
            PcType::Jacobi => StructPc::Jacobi(StructJacobi::with_omega(opts.omega)),
            PcType::Multigrid => StructPc::Multigrid(Box::new(StructMultigrid::new(opts.clone()))),
            PcType::Ilu0 => StructPc::Ilu0(StructIlu0::new()),
        }
    }

    pub fn pc_type(&self) -> PcType {
        match self {
            StructPc::Identity => PcType::None,
            StructPc::Jacobi(_) => PcType::Jacobi,
            StructPc::Multigrid(_) => PcType::Multigrid,
            StructPc::Ilu0(_) => PcType::Ilu0,
        }
    }
}

impl<T: Real> Default for StructPc<T> {
    fn default() -> Self {
        StructPc::Identity
    }
}

impl<T: Real> std::fmt::Debug for StructPc<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StructPc").field(&self.pc_type()).finish()
    }
}

impl<T: Real> Preconditioner<StructMatrix<T>, StructVector<T>> for StructPc<T> {
    fn setup(&mut self, a: &StructMatrix<T>) -> Result<(), KError> {
        match self {
            StructPc::Identity => a.ensure_assembled(),
            StructPc::Jacobi(pc) => pc.setup(a),
            StructPc::Multigrid(pc) => pc.setup(a),
            StructPc::Ilu0(pc) => Preconditioner::<StructMatrix<T>, StructVector<T>>::setup(pc, a),
        }
    }

    fn apply(&mut self, a: &StructMatrix<T>, r: &StructVector<T>, z: &mut StructVector<T>) -> Result<(), KError> {
        match self {
            StructPc::Identity => {
                z.copy_from(r);
                Ok(())
            }
            StructPc::Jacobi(pc) => pc.apply(a, r, z),
            StructPc::Multigrid(pc) => pc.apply(a, r, z),
            StructPc::Ilu0(pc) => pc.apply(a, r, z),
        }
    }

    fn destroy(&mut self) {
        match self {
            StructPc::Identity => {}
            StructPc::Jacobi(pc) => pc.destroy(),
            StructPc::Multigrid(pc) => pc.destroy(),
            StructPc::Ilu0(pc) => Preconditioner::<StructMatrix<T>, StructVector<T>>::destroy(pc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{StructGrid, StructStencil};
    use crate::parallel::{Comm, SerialComm};
    use approx::assert_abs_diff_eq;
    use std::rc::Rc;

    fn system() -> (Rc<StructGrid>, StructMatrix<f64>) {
        let comm: Rc<dyn Comm> = Rc::new(SerialComm::new());
        let mut g = StructGrid::new(1, comm).unwrap();
        g.set_extents(&[0], &[7]).unwrap();
        g.assemble().unwrap();
        let g = Rc::new(g);
        let s = StructStencil::laplacian(1).unwrap();
        let mut a = StructMatrix::new(&g, &s).unwrap();
        a.set_constant_values(&[0, 1, 2], &[4.0, -1.0, -1.0]).unwrap();
        a.assemble().unwrap();
        (g, a)
    }

    #[test]
    fn tag_follows_options() {
        for t in [PcType::None, PcType::Jacobi, PcType::Multigrid, PcType::Ilu0] {
            assert_eq!(StructPc::<f64>::from_options(&PcOptions::new(t)).pc_type(), t);
        }
    }

    #[test]
    fn jacobi_variant_scales_by_inverse_diagonal() {
        let (g, a) = system();
        let mut pc = StructPc::from_options(&PcOptions::new(PcType::Jacobi));
        pc.setup(&a).unwrap();
        let mut r = StructVector::new(&g).unwrap();
        r.set_constant_values(2.0).unwrap();
        let mut z = r.zeros_like();
        pc.apply(&a, &r, &mut z).unwrap();
        for v in z.get_values(&[0], &[7]).unwrap() {
            assert_abs_diff_eq!(v, 0.5, epsilon = 1e-15);
        }
    }

    #[test]
    fn destroyed_variant_needs_new_setup() {
        let (g, a) = system();
        let mut pc = StructPc::from_options(&PcOptions::new(PcType::Ilu0));
        pc.setup(&a).unwrap();
        pc.destroy();
        let r = StructVector::new(&g).unwrap();
        let mut z = r.zeros_like();
        assert!(matches!(pc.apply(&a, &r, &mut z), Err(KError::InvalidState(_))));
    }
}
