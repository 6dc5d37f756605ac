//! HGMRES-style façade over structured operands.
//!
//! `KspContext` owns one restarted GMRES solver and one [`StructPc`], and
//! exposes the set-preconditioner / setup / solve / query / destroy sequence
//! a binding layer drives. Matrices and vectors stay owned by the caller and
//! are borrowed per call.
//!
//! # Usage
//!
//! 1. Construct a `KspContext` from `GmresOptions` and `PcOptions`.
//! 2. Call `setup(&a, &b)` once per operator.
//! 3. Call `solve(&a, &b, &mut x)`, then query the iteration count and the
//!    final relative residual norm.

use crate::config::{GmresOptions, PcOptions, SolverLogging};
use crate::context::pc_context::StructPc;
use crate::core::traits::Real;
use crate::error::KError;
use crate::matrix::{StructMatrix, StructVector};
use crate::preconditioner::Preconditioner;
use crate::solver::{GmresSolver, SolverState};
use crate::utils::convergence::SolveStats;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Context and configuration for a structured GMRES solve.
pub struct KspContext<T: Real = f64> {
    solver: GmresSolver<StructVector<T>>,
    pc: StructPc<T>,
    pc_opts: PcOptions,
}

impl<T: Real> KspContext<T> {
    /// Fails with `InvalidArgument` on options that could not run.
    pub fn new(opts: GmresOptions, pc_opts: PcOptions) -> Result<Self, KError> {
        pc_opts.validate()?;
        let solver = GmresSolver::with_options(opts)?;
        Ok(Self { solver, pc: StructPc::from_options(&pc_opts), pc_opts })
    }

    fn reconfigure(&mut self, f: impl FnOnce(GmresOptions) -> Result<GmresOptions, KError>) -> Result<(), KError> {
        let opts = f(self.solver.options().clone())?;
        self.solver.configure(opts)
    }

    pub fn set_tol(&mut self, tol: f64) -> Result<(), KError> {
        self.reconfigure(|o| o.with_tol(tol))
    }

    pub fn set_abs_tol(&mut self, atol: f64) -> Result<(), KError> {
        self.reconfigure(|o| o.with_atol(atol))
    }

    pub fn set_max_iter(&mut self, max_iters: usize) -> Result<(), KError> {
        self.reconfigure(|o| Ok(o.with_max_iters(max_iters)))
    }

    pub fn set_min_iter(&mut self, min_iters: usize) -> Result<(), KError> {
        self.reconfigure(|o| Ok(o.with_min_iters(min_iters)))
    }

    /// Krylov dimension k of GMRES(k).
    pub fn set_restart(&mut self, restart: usize) -> Result<(), KError> {
        self.reconfigure(|o| o.with_restart(restart))
    }

    pub fn set_logging(&mut self, logging: SolverLogging) -> Result<(), KError> {
        self.reconfigure(|o| Ok(o.with_logging(logging)))
    }

    /// Replace the preconditioner; the previous one is destroyed and the
    /// context must be set up again.
    pub fn set_preconditioner(&mut self, pc_opts: PcOptions) -> Result<(), KError> {
        if self.solver.state() == SolverState::Destroyed {
            return Err(KError::UseAfterFree("solver"));
        }
        pc_opts.validate()?;
        self.pc.destroy();
        self.pc = StructPc::from_options(&pc_opts);
        self.pc_opts = pc_opts;
        self.solver.configure(self.solver.options().clone())
    }

    pub fn preconditioner_options(&self) -> &PcOptions {
        &self.pc_opts
    }

    fn check_operands(a: &StructMatrix<T>, vs: &[&StructVector<T>]) -> Result<(), KError> {
        a.ensure_assembled()?;
        for v in vs {
            v.ensure_assembled()?;
            if !v.same_grid(a.grid()) {
                return Err(KError::InvalidArgument("vector and matrix live on different grids".into()));
            }
        }
        Ok(())
    }

    /// Collective. Set up the preconditioner for `a` and size the workspace after `b`.
    pub fn setup(&mut self, a: &StructMatrix<T>, b: &StructVector<T>) -> Result<(), KError> {
        Self::check_operands(a, &[b])?;
        let pc: &mut dyn Preconditioner<StructMatrix<T>, StructVector<T>> = &mut self.pc;
        self.solver.setup(a, Some(pc), b)
    }

    /// Collective. Solve A x = b from the initial guess in `x`.
    pub fn solve(
        &mut self,
        a: &StructMatrix<T>,
        b: &StructVector<T>,
        x: &mut StructVector<T>,
    ) -> Result<SolveStats, KError> {
        Self::check_operands(a, &[b, &*x])?;
        let pc: &mut dyn Preconditioner<StructMatrix<T>, StructVector<T>> = &mut self.pc;
        self.solver.solve(a, Some(pc), b, x)
    }

    pub fn num_iterations(&self) -> Result<usize, KError> {
        self.solver.num_iterations()
    }

    pub fn final_relative_residual_norm(&self) -> Result<f64, KError> {
        self.solver.final_relative_residual_norm()
    }

    pub fn state(&self) -> SolverState {
        self.solver.state()
    }

    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        self.solver.abort_handle()
    }

    /// Release the solver workspace and the preconditioner's derived data.
    pub fn destroy(&mut self) -> Result<(), KError> {
        self.solver.destroy()?;
        self.pc.destroy();
        Ok(())
    }
}
