//! Dense interop: `faer::Mat<f64>` operators over plain `Vec<f64>` vectors.
//!
//! These implementations let the Krylov core run on small dense systems,
//! which is how the GMRES kernels are checked independently of the
//! structured-grid storage.

use crate::core::traits::{KrylovVector, MatVec};
use crate::error::KError;
use faer::Mat;

/// Implements matrix-vector multiplication for `faer::Mat`.
///
/// Computes `y = A * x` where `A` is a dense matrix, `x` and `y` are vectors.
impl MatVec<Vec<f64>> for Mat<f64> {
    fn matvec(&self, x: &mut Vec<f64>, y: &mut Vec<f64>) -> Result<(), KError> {
        if self.ncols() != x.len() || self.nrows() != y.len() {
            return Err(KError::InvalidArgument(format!(
                "dense matvec shape mismatch: A is {}x{}, x has {}, y has {}",
                self.nrows(),
                self.ncols(),
                x.len(),
                y.len()
            )));
        }
        for i in 0..self.nrows() {
            let mut acc = 0.0;
            for j in 0..self.ncols() {
                acc += self[(i, j)] * x[j];
            }
            y[i] = acc;
        }
        Ok(())
    }
}

impl KrylovVector for Vec<f64> {
    fn zeros_like(&self) -> Self {
        vec![0.0; self.len()]
    }
    fn copy_from(&mut self, src: &Self) {
        assert_eq!(self.len(), src.len(), "Vectors must have the same length");
        self.copy_from_slice(src);
    }
    fn axpy(&mut self, alpha: f64, x: &Self) {
        assert_eq!(self.len(), x.len(), "Vectors must have the same length");
        for (yi, xi) in self.iter_mut().zip(x) {
            *yi += alpha * xi;
        }
    }
    fn scale(&mut self, alpha: f64) {
        self.iter_mut().for_each(|v| *v *= alpha);
    }
    fn fill(&mut self, value: f64) {
        self.iter_mut().for_each(|v| *v = value);
    }
    /// Computes the dot product of two vectors: `x^T y`.
    fn dot(&self, other: &Self) -> Result<f64, KError> {
        assert_eq!(self.len(), other.len(), "Vectors must have the same length");
        Ok(self.iter().zip(other).map(|(a, b)| a * b).sum())
    }
}
