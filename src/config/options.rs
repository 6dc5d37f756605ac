//! API options for the GMRES solver and the structured preconditioners.
//!
//! `GmresOptions` carries the stopping criteria and restart length of the
//! Krylov solver; `PcOptions` selects a preconditioner variant and its
//! parameters (Jacobi damping, multigrid depth and sweeps). Both are plain
//! data with builder-style setters that validate their input.

use crate::error::KError;
use bitflags::bitflags;
use std::str::FromStr;

bitflags! {
    /// What the solver records and logs while iterating.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
    pub struct SolverLogging: u32 {
        /// Keep the residual norm estimate of every iteration.
        const RESIDUAL_HISTORY = 0b0001;
        /// Emit a `debug!` record per iteration.
        const ITERATIONS       = 0b0010;
        /// Emit an `info!` record when a solve terminates.
        const SUMMARY          = 0b0100;
        const ALL = Self::RESIDUAL_HISTORY.bits() | Self::ITERATIONS.bits() | Self::SUMMARY.bits();
    }
}

/// GMRES stopping criteria & restart length.
#[derive(Debug, Clone)]
pub struct GmresOptions {
    /// Relative tolerance on ‖r‖/‖b‖
    pub tol: f64,
    /// Absolute tolerance on ‖r‖ (0 disables)
    pub atol: f64,
    /// Iteration budget (one iteration = one matvec + one preconditioner apply)
    pub max_iters: usize,
    /// Krylov basis size before restart
    pub restart: usize,
    /// Iterations to perform before convergence may be declared
    pub min_iters: usize,
    pub logging: SolverLogging,
}

impl Default for GmresOptions {
    fn default() -> Self {
        Self {
            tol: 1e-6,
            atol: 0.0,
            max_iters: 1000,
            restart: 30,
            min_iters: 0,
            logging: SolverLogging::SUMMARY,
        }
    }
}

impl GmresOptions {
    /// Check fields set directly rather than through the `with_*` setters.
    pub fn validate(&self) -> Result<(), KError> {
        if !(self.tol >= 0.0) {
            return Err(KError::InvalidArgument(format!("relative tolerance {} must be >= 0", self.tol)));
        }
        if !(self.atol >= 0.0) {
            return Err(KError::InvalidArgument(format!("absolute tolerance {} must be >= 0", self.atol)));
        }
        if self.restart == 0 {
            return Err(KError::InvalidArgument("restart length must be positive".into()));
        }
        Ok(())
    }

    pub fn with_tol(mut self, tol: f64) -> Result<Self, KError> {
        if !(tol >= 0.0) {
            return Err(KError::InvalidArgument(format!("relative tolerance {tol} must be >= 0")));
        }
        self.tol = tol;
        Ok(self)
    }

    pub fn with_atol(mut self, atol: f64) -> Result<Self, KError> {
        if !(atol >= 0.0) {
            return Err(KError::InvalidArgument(format!("absolute tolerance {atol} must be >= 0")));
        }
        self.atol = atol;
        Ok(self)
    }

    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    pub fn with_restart(mut self, restart: usize) -> Result<Self, KError> {
        if restart == 0 {
            return Err(KError::InvalidArgument("restart length must be positive".into()));
        }
        self.restart = restart;
        Ok(self)
    }

    pub fn with_min_iters(mut self, min_iters: usize) -> Self {
        self.min_iters = min_iters;
        self
    }

    pub fn with_logging(mut self, logging: SolverLogging) -> Self {
        self.logging = logging;
        self
    }
}

/// Preconditioner variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcType {
    /// z = r
    None,
    /// Damped diagonal scaling
    Jacobi,
    /// Geometric V-cycle over a box-coarsened hierarchy
    Multigrid,
    /// Box-local incomplete LU with the stencil's sparsity
    Ilu0,
}

impl FromStr for PcType {
    type Err = KError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "identity" => Ok(PcType::None),
            "jacobi" => Ok(PcType::Jacobi),
            "mg" | "pfmg" | "multigrid" => Ok(PcType::Multigrid),
            "ilu" | "ilu0" => Ok(PcType::Ilu0),
            other => Err(KError::InvalidArgument(format!("unknown preconditioner type '{other}'"))),
        }
    }
}

/// Preconditioner types & parameters.
#[derive(Debug, Clone)]
pub struct PcOptions {
    pub pc_type: PcType,
    /// Damping factor ω for Jacobi and for the multigrid smoother
    pub omega: f64,
    /// Maximum number of multigrid levels, fine level included
    pub max_levels: usize,
    pub pre_sweeps: usize,
    pub post_sweeps: usize,
    /// Relaxation sweeps on the coarsest level when it is not solved directly
    pub coarse_sweeps: usize,
    /// Largest coarsest-level size factored densely (serial runs only)
    pub coarse_direct_max: usize,
}

impl Default for PcOptions {
    fn default() -> Self {
        Self {
            pc_type: PcType::Jacobi,
            omega: 1.0,
            max_levels: 8,
            pre_sweeps: 1,
            post_sweeps: 1,
            coarse_sweeps: 20,
            coarse_direct_max: 512,
        }
    }
}

impl PcOptions {
    pub fn new(pc_type: PcType) -> Self {
        let omega = if pc_type == PcType::Multigrid { 0.8 } else { 1.0 };
        Self { pc_type, omega, ..Self::default() }
    }

    pub fn validate(&self) -> Result<(), KError> {
        if !(self.omega > 0.0 && self.omega < 2.0) {
            return Err(KError::InvalidArgument(format!("relaxation factor {} outside (0, 2)", self.omega)));
        }
        if self.max_levels == 0 {
            return Err(KError::InvalidArgument("multigrid needs at least one level".into()));
        }
        Ok(())
    }

    pub fn with_omega(mut self, omega: f64) -> Result<Self, KError> {
        if !(omega > 0.0 && omega < 2.0) {
            return Err(KError::InvalidArgument(format!("relaxation factor {omega} outside (0, 2)")));
        }
        self.omega = omega;
        Ok(self)
    }

    pub fn with_max_levels(mut self, max_levels: usize) -> Result<Self, KError> {
        if max_levels == 0 {
            return Err(KError::InvalidArgument("multigrid needs at least one level".into()));
        }
        self.max_levels = max_levels;
        Ok(self)
    }

    pub fn with_sweeps(mut self, pre: usize, post: usize) -> Self {
        self.pre_sweeps = pre;
        self.post_sweeps = post;
        self
    }

    pub fn with_coarse_sweeps(mut self, sweeps: usize) -> Self {
        self.coarse_sweeps = sweeps;
        self
    }

    pub fn with_coarse_direct_max(mut self, n: usize) -> Self {
        self.coarse_direct_max = n;
        self
    }
}
