//! Generalized Minimal Residual (GMRES) solver with fixed restart (Saad §6.4)
//!
//! Restarted GMRES(k) with right preconditioning for large, sparse and possibly
//! nonsymmetric systems Ax = b. Every iteration performs exactly one
//! preconditioner apply and one matrix apply; the Arnoldi basis is built on
//! A M⁻¹ and the solution update is M⁻¹ (V y), so the monitored residual is the
//! true, unpreconditioned one.
//!
//! # Features
//! - Double (iterative) modified Gram-Schmidt orthogonalization
//! - Givens rotations for the incremental least-squares update
//! - Robust back-substitution with zero-pivot protection
//! - Breakdown detection relative to the size of the new direction
//! - Caller-driven abort, checked once per outer cycle
//!
//! All Krylov scalars (Hessenberg entries, rotations, norms) are f64 whatever
//! the vector storage precision.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, 2nd Edition. SIAM. §6.4
//! - https://en.wikipedia.org/wiki/Generalized_minimal_residual_method

use crate::config::{GmresOptions, SolverLogging};
use crate::core::traits::{KrylovVector, MatVec};
use crate::error::KError;
use crate::preconditioner::Preconditioner;
use crate::solver::{precondition, LinearSolver};
use crate::utils::convergence::{Convergence, Outcome, SolveStats};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An Arnoldi pivot `h[j+1][j]` at or below this fraction of ‖A M⁻¹ vⱼ‖ ends the cycle.
pub const BREAKDOWN_TOL: f64 = 1e-12;

/// Zero-pivot guard for Givens rotations and back-substitution.
const EPSILON: f64 = 1e-300;

/// Solver lifecycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SolverState {
    Uninitialized,
    Configured,
    SetupDone,
    Iterating,
    Converged,
    MaxIterReached,
    Aborted,
    Fatal,
    Destroyed,
}

impl SolverState {
    fn from_outcome(o: Outcome) -> Self {
        match o {
            Outcome::Converged => SolverState::Converged,
            Outcome::MaxIterReached => SolverState::MaxIterReached,
            Outcome::Aborted => SolverState::Aborted,
            Outcome::Fatal => SolverState::Fatal,
        }
    }
}

struct Workspace<V> {
    /// Arnoldi basis v₀ … v_k
    basis: Vec<V>,
    w: V,
    z: V,
    r: V,
}

/// Restarted GMRES over any vector type with the Krylov operations.
pub struct GmresSolver<V> {
    opts: GmresOptions,
    state: SolverState,
    work: Option<Workspace<V>>,
    stats: Option<SolveStats>,
    abort: Arc<AtomicBool>,
}

impl<V> Default for GmresSolver<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> GmresSolver<V> {
    /// An unconfigured solver; call [`configure`](Self::configure) before setup.
    pub fn new() -> Self {
        Self {
            opts: GmresOptions::default(),
            state: SolverState::Uninitialized,
            work: None,
            stats: None,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A configured solver; fails on options that could not run.
    pub fn with_options(opts: GmresOptions) -> Result<Self, KError> {
        let mut s = Self::new();
        s.configure(opts)?;
        Ok(s)
    }

    /// Replace the options. Drops any workspace, so setup must run again.
    pub fn configure(&mut self, opts: GmresOptions) -> Result<(), KError> {
        if self.state == SolverState::Destroyed {
            return Err(KError::UseAfterFree("solver"));
        }
        opts.validate()?;
        self.opts = opts;
        self.work = None;
        self.state = SolverState::Configured;
        Ok(())
    }

    pub fn options(&self) -> &GmresOptions {
        &self.opts
    }

    pub fn state(&self) -> SolverState {
        self.state
    }

    /// Shared flag; storing `true` stops the solve at the next restart.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Statistics of the most recent solve.
    pub fn stats(&self) -> Option<&SolveStats> {
        self.stats.as_ref()
    }

    pub fn num_iterations(&self) -> Result<usize, KError> {
        self.last_stats().map(|s| s.iterations)
    }

    pub fn final_relative_residual_norm(&self) -> Result<f64, KError> {
        self.last_stats().map(|s| s.relative_residual)
    }

    fn last_stats(&self) -> Result<&SolveStats, KError> {
        if self.state == SolverState::Destroyed {
            return Err(KError::UseAfterFree("solver"));
        }
        self.stats
            .as_ref()
            .ok_or_else(|| KError::InvalidState("no solve has been run".into()))
    }

    /// Release the workspace; every later call fails with `UseAfterFree`.
    pub fn destroy(&mut self) -> Result<(), KError> {
        if self.state == SolverState::Destroyed {
            return Err(KError::UseAfterFree("solver"));
        }
        self.work = None;
        self.stats = None;
        self.state = SolverState::Destroyed;
        Ok(())
    }

    // --- Apply Givens rotation and update g together ---
    /// Apply the previous rotations to column `j` of H, build rotation `j`
    /// and apply it to g.
    fn apply_givens_and_update_g(h: &mut [Vec<f64>], g: &mut [f64], cs: &mut [f64], sn: &mut [f64], j: usize) {
        for i in 0..j {
            let temp = cs[i] * h[i][j] + sn[i] * h[i + 1][j];
            h[i + 1][j] = -sn[i] * h[i][j] + cs[i] * h[i + 1][j];
            h[i][j] = temp;
        }
        let h_kk = h[j][j];
        let h_k1k = h[j + 1][j];
        let r = h_kk.hypot(h_k1k);
        if r < EPSILON {
            cs[j] = 1.0;
            sn[j] = 0.0;
        } else {
            cs[j] = h_kk / r;
            sn[j] = h_k1k / r;
        }
        h[j][j] = cs[j] * h_kk + sn[j] * h_k1k;
        h[j + 1][j] = 0.0;
        let temp = cs[j] * g[j] + sn[j] * g[j + 1];
        g[j + 1] = -sn[j] * g[j] + cs[j] * g[j + 1];
        g[j] = temp;
    }

    // --- Back-substitution for least squares with zero-pivot protection ---
    fn back_substitution(h: &[Vec<f64>], g: &[f64], m: usize) -> Vec<f64> {
        let mut y = vec![0.0; m];
        for i in (0..m).rev() {
            let mut acc = g[i];
            for j in (i + 1)..m {
                acc -= h[i][j] * y[j];
            }
            y[i] = if h[i][i].abs() > EPSILON { acc / h[i][i] } else { 0.0 };
        }
        y
    }
}

/// How one Arnoldi cycle ended.
struct Cycle {
    steps: usize,
    breakdown: bool,
}

impl<V: KrylovVector> GmresSolver<V> {
    /// Set up the preconditioner and allocate the Krylov workspace.
    pub fn setup<M>(
        &mut self,
        a: &M,
        pc: Option<&mut dyn Preconditioner<M, V>>,
        b: &V,
    ) -> Result<(), KError> {
        match self.state {
            SolverState::Destroyed => return Err(KError::UseAfterFree("solver")),
            SolverState::Uninitialized => {
                return Err(KError::InvalidState("solver must be configured before setup".into()));
            }
            _ => {}
        }
        self.opts.validate()?;
        // a failed setup leaves the solver unusable until the next success
        self.work = None;
        self.state = SolverState::Configured;
        if let Some(pc) = pc {
            pc.setup(a)?;
        }
        let k = self.opts.restart;
        self.work = Some(Workspace {
            basis: (0..=k).map(|_| b.zeros_like()).collect(),
            w: b.zeros_like(),
            z: b.zeros_like(),
            r: b.zeros_like(),
        });
        self.state = SolverState::SetupDone;
        info!(
            "GMRES({k}) set up: tol={:e}, atol={:e}, max_iters={}",
            self.opts.tol, self.opts.atol, self.opts.max_iters
        );
        Ok(())
    }

    /// Solve A x = b starting from the incoming `x`.
    ///
    /// Returns the statistics for `Converged`, `MaxIterReached` and `Aborted`
    /// outcomes. A breakdown without convergence, a non-finite residual or a
    /// failing operator leaves the solver `Fatal` and returns the error; `x`
    /// then holds the last completed update.
    pub fn solve<M: MatVec<V>>(
        &mut self,
        a: &M,
        mut pc: Option<&mut dyn Preconditioner<M, V>>,
        b: &V,
        x: &mut V,
    ) -> Result<SolveStats, KError> {
        match self.state {
            SolverState::Destroyed => return Err(KError::UseAfterFree("solver")),
            SolverState::Uninitialized | SolverState::Configured => {
                return Err(KError::InvalidState("solver must be set up before solve".into()));
            }
            _ => {}
        }
        let mut ws = self
            .work
            .take()
            .ok_or_else(|| KError::InvalidState("solver workspace is missing".into()))?;
        self.state = SolverState::Iterating;
        let mut stats = SolveStats {
            iterations: 0,
            final_residual: f64::NAN,
            relative_residual: f64::NAN,
            outcome: Outcome::Fatal,
            history: Vec::new(),
        };
        let result = self.iterate(a, &mut pc, b, x, &mut ws, &mut stats);
        self.work = Some(ws);
        let outcome = match result {
            Ok(()) => stats.outcome,
            Err(ref e) => {
                warn!("GMRES failed after {} iterations: {e}", stats.iterations);
                stats.outcome = Outcome::Fatal;
                Outcome::Fatal
            }
        };
        self.state = SolverState::from_outcome(outcome);
        if self.opts.logging.contains(SolverLogging::SUMMARY) {
            info!(
                "GMRES finished: {:?} after {} iterations, relative residual {:e}",
                outcome, stats.iterations, stats.relative_residual
            );
        }
        if outcome == Outcome::Aborted {
            self.abort.store(false, Ordering::SeqCst);
        }
        self.stats = Some(stats.clone());
        result.map(|()| stats)
    }

    fn iterate<M: MatVec<V>>(
        &self,
        a: &M,
        pc: &mut Option<&mut dyn Preconditioner<M, V>>,
        b: &V,
        x: &mut V,
        ws: &mut Workspace<V>,
        stats: &mut SolveStats,
    ) -> Result<(), KError> {
        let conv = Convergence {
            tol: self.opts.tol,
            atol: self.opts.atol,
            max_iters: self.opts.max_iters,
            min_iters: self.opts.min_iters,
        };
        let b_norm = b.norm()?;
        if b_norm == 0.0 {
            x.fill(0.0);
            stats.final_residual = 0.0;
            stats.relative_residual = 0.0;
            stats.outcome = Outcome::Converged;
            return Ok(());
        }
        let mut beta = self.true_residual(a, b, x, ws)?;
        loop {
            stats.final_residual = beta;
            stats.relative_residual = Convergence::relative(beta, b_norm);
            if !beta.is_finite() {
                warn!("GMRES residual became non-finite");
                return Err(KError::Fatal("non-finite residual norm".into()));
            }
            // an exact solution admits no further Arnoldi steps
            if beta == 0.0 || conv.is_converged(beta, b_norm, stats.iterations) {
                stats.outcome = Outcome::Converged;
                return Ok(());
            }
            if stats.iterations >= conv.max_iters {
                stats.outcome = Outcome::MaxIterReached;
                return Ok(());
            }
            if self.abort.load(Ordering::SeqCst) {
                warn!("GMRES aborted by caller after {} iterations", stats.iterations);
                stats.outcome = Outcome::Aborted;
                return Ok(());
            }

            let cycle = self.cycle(a, pc, b_norm, beta, &conv, x, ws, stats)?;
            if cycle.steps == 0 {
                return Err(KError::Fatal("Arnoldi cycle made no progress".into()));
            }
            let new_beta = self.true_residual(a, b, x, ws)?;
            if cycle.breakdown && !conv.is_converged(new_beta, b_norm, stats.iterations) && new_beta >= beta {
                stats.final_residual = new_beta;
                stats.relative_residual = Convergence::relative(new_beta, b_norm);
                warn!(
                    "GMRES stagnated after breakdown at step {} (residual {:e})",
                    cycle.steps, new_beta
                );
                return Err(KError::Fatal(format!(
                    "Arnoldi breakdown without progress (residual {new_beta:e})"
                )));
            }
            beta = new_beta;
        }
    }

    /// r ← b − A x; returns ‖r‖.
    fn true_residual<M: MatVec<V>>(&self, a: &M, b: &V, x: &mut V, ws: &mut Workspace<V>) -> Result<f64, KError> {
        a.matvec(x, &mut ws.w)?;
        ws.r.copy_from(b);
        ws.r.axpy(-1.0, &ws.w);
        ws.r.norm()
    }

    /// One Arnoldi cycle from the residual in `ws.r`, followed by the update
    /// x ← x + M⁻¹ V y.
    #[allow(clippy::too_many_arguments)]
    fn cycle<M: MatVec<V>>(
        &self,
        a: &M,
        pc: &mut Option<&mut dyn Preconditioner<M, V>>,
        b_norm: f64,
        beta: f64,
        conv: &Convergence,
        x: &mut V,
        ws: &mut Workspace<V>,
        stats: &mut SolveStats,
    ) -> Result<Cycle, KError> {
        let k = self.opts.restart;
        let mut h = vec![vec![0.0f64; k]; k + 1];
        let mut g = vec![0.0f64; k + 1];
        let mut cs = vec![0.0f64; k];
        let mut sn = vec![0.0f64; k];
        g[0] = beta;
        ws.basis[0].copy_from(&ws.r);
        ws.basis[0].scale(1.0 / beta);

        let mut m = 0;
        let mut breakdown = false;
        for j in 0..k {
            if stats.iterations >= conv.max_iters {
                break;
            }
            // w = A M⁻¹ v_j
            precondition(pc.as_deref_mut(), a, &ws.basis[j], &mut ws.z)?;
            a.matvec(&mut ws.z, &mut ws.w)?;
            stats.iterations += 1;
            let w_norm = ws.w.norm()?;

            // Modified Gram-Schmidt, then a second pass against round-off
            for _ in 0..2 {
                for i in 0..=j {
                    let hij = ws.w.dot(&ws.basis[i])?;
                    ws.w.axpy(-hij, &ws.basis[i]);
                    h[i][j] += hij;
                }
            }
            h[j + 1][j] = ws.w.norm()?;
            if !h[j + 1][j].is_finite() || !w_norm.is_finite() {
                return Err(KError::Fatal(format!("non-finite Arnoldi vector at step {j}")));
            }
            breakdown = h[j + 1][j] <= BREAKDOWN_TOL * w_norm;
            let pivot = h[j + 1][j];

            Self::apply_givens_and_update_g(&mut h, &mut g, &mut cs, &mut sn, j);
            m = j + 1;
            let res = g[j + 1].abs();
            if self.opts.logging.contains(SolverLogging::RESIDUAL_HISTORY) {
                stats.history.push(res);
            }
            if self.opts.logging.contains(SolverLogging::ITERATIONS) {
                debug!(
                    "GMRES iter {}: residual {:e}, relative {:e}",
                    stats.iterations,
                    res,
                    Convergence::relative(res, b_norm)
                );
            }
            if breakdown {
                debug!("GMRES breakdown at step {j}: pivot {pivot:e} vs ‖w‖ {w_norm:e}");
                break;
            }
            ws.basis[j + 1].copy_from(&ws.w);
            ws.basis[j + 1].scale(1.0 / pivot);
            if conv.is_converged(res, b_norm, stats.iterations) {
                break;
            }
        }

        if m > 0 {
            let y = Self::back_substitution(&h, &g, m);
            // z = M⁻¹ (V y)
            ws.w.fill(0.0);
            for (yi, vi) in y.iter().zip(&ws.basis) {
                ws.w.axpy(*yi, vi);
            }
            precondition(pc.as_deref_mut(), a, &ws.w, &mut ws.z)?;
            x.axpy(1.0, &ws.z);
        }
        Ok(Cycle { steps: m, breakdown })
    }
}

impl<M, V> LinearSolver<M, V> for GmresSolver<V>
where
    M: MatVec<V>,
    V: KrylovVector,
{
    fn setup(&mut self, a: &M, pc: Option<&mut dyn Preconditioner<M, V>>, b: &V) -> Result<(), KError> {
        GmresSolver::setup(self, a, pc, b)
    }

    fn solve(
        &mut self,
        a: &M,
        pc: Option<&mut dyn Preconditioner<M, V>>,
        b: &V,
        x: &mut V,
    ) -> Result<SolveStats, KError> {
        GmresSolver::solve(self, a, pc, b, x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preconditioner::Identity;
    use approx::assert_abs_diff_eq;
    use faer::Mat;

    /// 4x4 non-symmetric, well-conditioned system; b = A [1, 2, 3, 4].
    fn nonsym() -> (Mat<f64>, Vec<f64>, Vec<f64>) {
        let rows = [
            [4.0, 1.0, 0.0, 0.0],
            [2.0, 3.0, 1.0, 0.0],
            [0.0, 1.0, 2.0, 1.0],
            [0.0, 0.5, 1.0, 3.0],
        ];
        let a = Mat::from_fn(4, 4, |i, j| rows[i][j]);
        let mut x_true = vec![1.0, 2.0, 3.0, 4.0];
        let mut b = vec![0.0; 4];
        a.matvec(&mut x_true, &mut b).unwrap();
        (a, b, x_true)
    }

    fn opts(restart: usize) -> GmresOptions {
        GmresOptions::default().with_tol(1e-10).unwrap().with_restart(restart).unwrap()
    }

    /// Diagonal scaling over dense matrices, enough to exercise the pc path.
    struct DenseJacobi(Vec<f64>);

    impl Preconditioner<Mat<f64>, Vec<f64>> for DenseJacobi {
        fn setup(&mut self, a: &Mat<f64>) -> Result<(), KError> {
            self.0 = (0..a.nrows()).map(|i| 1.0 / a[(i, i)]).collect();
            Ok(())
        }
        fn apply(&mut self, _a: &Mat<f64>, r: &Vec<f64>, z: &mut Vec<f64>) -> Result<(), KError> {
            for ((zi, ri), d) in z.iter_mut().zip(r).zip(&self.0) {
                *zi = ri * d;
            }
            Ok(())
        }
    }

    #[test]
    fn gmres_solves_well_conditioned_nonsym() {
        let (a, b, x_true) = nonsym();
        let mut x = vec![0.0; 4];
        let mut solver = GmresSolver::with_options(opts(4)).unwrap();
        solver.setup(&a, None, &b).unwrap();
        let stats = solver.solve(&a, None, &b, &mut x).unwrap();
        assert!(stats.converged(), "GMRES did not converge");
        assert!(stats.iterations <= 4);
        for (xi, ei) in x.iter().zip(&x_true) {
            assert_abs_diff_eq!(*xi, *ei, epsilon = 1e-8);
        }
        assert_eq!(solver.state(), SolverState::Converged);
    }

    #[test]
    fn gmres_with_jacobi_preconditioner() {
        let (a, b, x_true) = nonsym();
        let mut pc = DenseJacobi(Vec::new());
        let mut x = vec![0.0; 4];
        let mut solver = GmresSolver::with_options(opts(4)).unwrap();
        solver.setup(&a, Some(&mut pc), &b).unwrap();
        let stats = solver.solve(&a, Some(&mut pc), &b, &mut x).unwrap();
        assert!(stats.converged(), "GMRES+Jacobi did not converge");
        for (xi, ei) in x.iter().zip(&x_true) {
            assert_abs_diff_eq!(*xi, *ei, epsilon = 1e-8);
        }
    }

    #[test]
    fn short_restart_still_converges() {
        let (a, b, x_true) = nonsym();
        let mut x = vec![0.0; 4];
        let mut id = Identity;
        let mut solver = GmresSolver::with_options(opts(2).with_max_iters(200)).unwrap();
        solver.setup(&a, Some(&mut id), &b).unwrap();
        let stats = solver.solve(&a, Some(&mut id), &b, &mut x).unwrap();
        assert!(stats.converged());
        for (xi, ei) in x.iter().zip(&x_true) {
            assert_abs_diff_eq!(*xi, *ei, epsilon = 1e-8);
        }
        assert!(solver.final_relative_residual_norm().unwrap() <= 1e-10);
    }

    #[test]
    fn zero_rhs_gives_zero_solution() {
        let (a, _, _) = nonsym();
        let b = vec![0.0; 4];
        let mut x = vec![5.0; 4];
        let mut solver = GmresSolver::with_options(opts(4)).unwrap();
        solver.setup(&a, None, &b).unwrap();
        let stats = solver.solve(&a, None, &b, &mut x).unwrap();
        assert!(stats.converged());
        assert_eq!(stats.iterations, 0);
        assert_eq!(x, vec![0.0; 4]);
    }

    #[test]
    fn iteration_budget_is_respected() {
        let (a, b, _) = nonsym();
        let mut x = vec![0.0; 4];
        let o = opts(4).with_max_iters(2).with_logging(SolverLogging::ALL);
        let mut solver = GmresSolver::with_options(o).unwrap();
        solver.setup(&a, None, &b).unwrap();
        let stats = solver.solve(&a, None, &b, &mut x).unwrap();
        assert_eq!(stats.outcome, Outcome::MaxIterReached);
        assert_eq!(stats.iterations, 2);
        assert_eq!(stats.history.len(), 2);
        assert!(stats.history[1] <= stats.history[0]);
        assert_eq!(solver.state(), SolverState::MaxIterReached);
    }

    #[test]
    fn min_iters_delays_convergence() {
        let (a, b, _) = nonsym();
        let mut x = vec![0.0; 4];
        let o = GmresOptions::default().with_tol(0.9).unwrap().with_restart(4).unwrap().with_min_iters(3);
        let mut solver = GmresSolver::with_options(o).unwrap();
        solver.setup(&a, None, &b).unwrap();
        let stats = solver.solve(&a, None, &b, &mut x).unwrap();
        assert!(stats.converged());
        assert!(stats.iterations >= 3);
    }

    #[test]
    fn abort_is_honored_at_restart() {
        let (a, b, _) = nonsym();
        let mut x = vec![0.0; 4];
        let mut solver = GmresSolver::with_options(opts(4)).unwrap();
        solver.setup(&a, None, &b).unwrap();
        solver.abort_handle().store(true, Ordering::SeqCst);
        let stats = solver.solve(&a, None, &b, &mut x).unwrap();
        assert_eq!(stats.outcome, Outcome::Aborted);
        assert_eq!(stats.iterations, 0);
        assert_eq!(solver.state(), SolverState::Aborted);
        // the flag is consumed
        let stats = solver.solve(&a, None, &b, &mut x).unwrap();
        assert!(stats.converged());
    }

    #[test]
    fn singular_system_is_fatal_and_keeps_iterate() {
        // b is not in the range of A
        let a = Mat::from_fn(2, 2, |i, j| if i == 0 && j == 0 { 1.0 } else { 0.0 });
        let b = vec![1.0, 1.0];
        let mut x = vec![0.0; 2];
        let mut solver = GmresSolver::with_options(opts(2)).unwrap();
        solver.setup(&a, None, &b).unwrap();
        let err = solver.solve(&a, None, &b, &mut x).unwrap_err();
        assert_eq!(err.code(), -6);
        assert_eq!(solver.state(), SolverState::Fatal);
        assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_restart_is_rejected_up_front() {
        let bad = GmresOptions { restart: 0, ..Default::default() };
        assert!(matches!(GmresSolver::<Vec<f64>>::with_options(bad.clone()), Err(KError::InvalidArgument(_))));
        let mut solver: GmresSolver<Vec<f64>> = GmresSolver::new();
        assert!(solver.configure(bad).is_err());
        assert_eq!(solver.state(), SolverState::Uninitialized);
    }

    #[test]
    fn failed_pc_setup_leaves_solver_configured() {
        let (a, b, _) = nonsym();
        let mut pc = DenseJacobi(Vec::new());
        let mut solver = GmresSolver::with_options(opts(4)).unwrap();
        solver.setup(&a, Some(&mut pc), &b).unwrap();
        let mut failing = FailingPc;
        assert!(solver.setup(&a, Some(&mut failing), &b).is_err());
        assert_eq!(solver.state(), SolverState::Configured);
        let mut x = vec![0.0; 4];
        assert!(matches!(solver.solve(&a, Some(&mut pc), &b, &mut x), Err(KError::InvalidState(_))));
    }

    struct FailingPc;

    impl Preconditioner<Mat<f64>, Vec<f64>> for FailingPc {
        fn setup(&mut self, _a: &Mat<f64>) -> Result<(), KError> {
            Err(KError::SingularOperator("always".into()))
        }
        fn apply(&mut self, _a: &Mat<f64>, r: &Vec<f64>, z: &mut Vec<f64>) -> Result<(), KError> {
            z.copy_from(r);
            Ok(())
        }
    }

    #[test]
    fn lifecycle_is_enforced() {
        let (a, b, _) = nonsym();
        let mut x = vec![0.0; 4];
        let mut solver: GmresSolver<Vec<f64>> = GmresSolver::new();
        assert!(matches!(solver.setup(&a, None, &b), Err(KError::InvalidState(_))));
        solver.configure(opts(4)).unwrap();
        assert!(matches!(solver.solve(&a, None, &b, &mut x), Err(KError::InvalidState(_))));
        assert!(matches!(solver.num_iterations(), Err(KError::InvalidState(_))));
        solver.destroy().unwrap();
        assert_eq!(solver.destroy(), Err(KError::UseAfterFree("solver")));
        assert_eq!(solver.setup(&a, None, &b), Err(KError::UseAfterFree("solver")));
    }
}
