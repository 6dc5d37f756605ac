//! Core linear-algebra traits for kryst-struct.

use crate::error::KError;
use num_traits::{Float, FromPrimitive, ToPrimitive};
use std::fmt::Debug;

/// Storage scalar for structured matrices and vectors (f32 or f64).
pub trait Real: Float + FromPrimitive + ToPrimitive + Debug + Send + Sync + 'static {
    /// Widen to f64 for accumulation and transport.
    fn to_f64_lossy(self) -> f64 {
        self.to_f64().unwrap_or(f64::NAN)
    }
    /// Narrow from f64 (Krylov scalars, received halo data).
    fn from_f64_lossy(x: f64) -> Self {
        <Self as FromPrimitive>::from_f64(x).unwrap_or_else(Self::nan)
    }
}

impl<T> Real for T where T: Float + FromPrimitive + ToPrimitive + Debug + Send + Sync + 'static {}

/// Matrix–vector product: y ← A x.
///
/// `x` is taken mutably because a distributed operator refreshes the ghost
/// layer of `x` before it reads neighbor values.
pub trait MatVec<V> {
    /// Compute y = A · x.
    fn matvec(&self, x: &mut V, y: &mut V) -> Result<(), KError>;
}

/// The vector operations a Krylov method needs.
///
/// `dot` is a collective operation for distributed vectors; every rank must
/// call it in the same order.
pub trait KrylovVector: Sized {
    /// A zero vector with the same layout as `self`.
    fn zeros_like(&self) -> Self;
    /// self ← src
    fn copy_from(&mut self, src: &Self);
    /// self ← self + alpha · x
    fn axpy(&mut self, alpha: f64, x: &Self);
    /// self ← alpha · self
    fn scale(&mut self, alpha: f64);
    /// Set every owned entry to `value`.
    fn fill(&mut self, value: f64);
    /// Global inner product, accumulated in f64.
    fn dot(&self, other: &Self) -> Result<f64, KError>;
    /// Global Euclidean norm.
    fn norm(&self) -> Result<f64, KError> {
        Ok(self.dot(self)?.sqrt())
    }
}
