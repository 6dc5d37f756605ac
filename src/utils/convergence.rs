//! Convergence tracking & tolerance checks for iterative solvers.

/// Stopping criteria.
#[derive(Clone, Debug)]
pub struct Convergence {
    /// Relative tolerance on ‖r‖/‖b‖.
    pub tol: f64,
    /// Absolute tolerance on ‖r‖ (0 disables it).
    pub atol: f64,
    pub max_iters: usize,
    /// Iterations to perform before convergence may be declared.
    pub min_iters: usize,
}

/// Terminal state of a solve, as reported in [`SolveStats`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Converged,
    MaxIterReached,
    Aborted,
    Fatal,
}

#[derive(Clone, Debug)]
pub struct SolveStats {
    pub iterations: usize,
    pub final_residual: f64,
    pub relative_residual: f64,
    pub outcome: Outcome,
    /// Residual norm estimate after every iteration, when history is enabled.
    pub history: Vec<f64>,
}

impl SolveStats {
    pub fn converged(&self) -> bool {
        self.outcome == Outcome::Converged
    }
}

impl Convergence {
    /// Residual norm below which the solve counts as converged.
    pub fn threshold(&self, b_norm: f64) -> f64 {
        (self.tol * b_norm).max(self.atol)
    }

    /// True when `res_norm` satisfies the relative or absolute criterion and
    /// at least `min_iters` iterations were spent.
    pub fn is_converged(&self, res_norm: f64, b_norm: f64, iteration: usize) -> bool {
        iteration >= self.min_iters && res_norm <= self.threshold(b_norm)
    }

    /// Relative residual, falling back to the absolute norm for b = 0.
    pub fn relative(res_norm: f64, b_norm: f64) -> f64 {
        if b_norm > 0.0 { res_norm / b_norm } else { res_norm }
    }
}
