//! ILU(0) factorization with zero fill (Saad §10.3), one factor per local box.
//!
//! Couplings that leave the box are dropped, so the factorization is a
//! block-Jacobi method with incomplete LU blocks and needs no communication.

use crate::core::traits::Real;
use crate::error::KError;
use crate::grid::StructGrid;
use crate::matrix::{StructMatrix, StructVector};
use crate::parallel::ReduceOp;
use crate::preconditioner::Preconditioner;
use std::rc::Rc;

/// Compressed rows of one box; `diag[i]` points at the diagonal of row `i`.
#[derive(Debug, Clone, Default)]
struct BoxFactor {
    row_ptr: Vec<usize>,
    cols: Vec<usize>,
    vals: Vec<f64>,
    diag: Vec<usize>,
}

impl BoxFactor {
    fn from_matrix<T: Real>(a: &StructMatrix<T>, b: usize) -> Result<Self, KError> {
        let bx = a.grid().boxes()[b];
        let coeffs = &a.coefficients()[b];
        let mut f = BoxFactor { row_ptr: vec![0], ..Default::default() };
        let mut row: Vec<(usize, f64)> = Vec::with_capacity(a.offsets().len());
        for (i, p) in bx.points().enumerate() {
            row.clear();
            for (e, o) in a.offsets().iter().enumerate() {
                let q = [p[0] + o[0], p[1] + o[1], p[2] + o[2]];
                if bx.contains(&q) {
                    row.push((bx.linear_index(&q), coeffs[e][i].to_f64_lossy()));
                }
            }
            row.sort_unstable_by_key(|&(c, _)| c);
            let d = row
                .iter()
                .position(|&(c, _)| c == i)
                .ok_or_else(|| KError::SingularOperator(format!("row {i} has no diagonal")))?;
            f.diag.push(f.cols.len() + d);
            for &(c, v) in &row {
                f.cols.push(c);
                f.vals.push(v);
            }
            f.row_ptr.push(f.cols.len());
        }
        Ok(f)
    }

    /// In-place IKJ elimination restricted to the existing pattern.
    fn factor(&mut self) -> Result<(), KError> {
        let n = self.diag.len();
        for i in 0..n {
            let (start, end) = (self.row_ptr[i], self.row_ptr[i + 1]);
            for kk in start..self.diag[i] {
                let k = self.cols[kk];
                let lik = self.vals[kk] / self.vals[self.diag[k]];
                self.vals[kk] = lik;
                let (ku, kend) = (self.diag[k] + 1, self.row_ptr[k + 1]);
                for jj in kk + 1..end {
                    let j = self.cols[jj];
                    if let Ok(pos) = self.cols[ku..kend].binary_search(&j) {
                        self.vals[jj] -= lik * self.vals[ku + pos];
                    }
                }
            }
            let piv = self.vals[self.diag[i]];
            if piv == 0.0 || !piv.is_finite() {
                return Err(KError::SingularOperator(format!("zero pivot in row {i}")));
            }
        }
        Ok(())
    }

    /// Solve (LU) x = x in place.
    fn solve(&self, x: &mut [f64]) {
        let n = self.diag.len();
        for i in 0..n {
            let mut acc = x[i];
            for kk in self.row_ptr[i]..self.diag[i] {
                acc -= self.vals[kk] * x[self.cols[kk]];
            }
            x[i] = acc;
        }
        for i in (0..n).rev() {
            let mut acc = x[i];
            for jj in self.diag[i] + 1..self.row_ptr[i + 1] {
                acc -= self.vals[jj] * x[self.cols[jj]];
            }
            x[i] = acc / self.vals[self.diag[i]];
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StructIlu0 {
    factors: Vec<BoxFactor>,
    grid: Option<Rc<StructGrid>>,
    work: Vec<f64>,
}

impl StructIlu0 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: Real> Preconditioner<StructMatrix<T>, StructVector<T>> for StructIlu0 {
    fn setup(&mut self, a: &StructMatrix<T>) -> Result<(), KError> {
        Preconditioner::<StructMatrix<T>, StructVector<T>>::destroy(self);
        a.ensure_assembled()?;
        let local: Result<Vec<BoxFactor>, KError> = (0..a.grid().boxes().len())
            .map(|b| {
                let mut f = BoxFactor::from_matrix(a, b)?;
                f.factor()?;
                Ok(f)
            })
            .collect();
        let failed = a.grid().comm().all_reduce(if local.is_err() { 1.0 } else { 0.0 }, ReduceOp::Max)?;
        let factors = match local {
            Err(e) => return Err(e),
            Ok(_) if failed > 0.0 => {
                return Err(KError::SingularOperator("ILU(0) broke down on another rank".into()));
            }
            Ok(f) => f,
        };
        self.work = vec![0.0; factors.iter().map(|f| f.diag.len()).max().unwrap_or(0)];
        self.factors = factors;
        self.grid = Some(Rc::clone(a.grid()));
        Ok(())
    }

    fn apply(&mut self, _a: &StructMatrix<T>, r: &StructVector<T>, z: &mut StructVector<T>) -> Result<(), KError> {
        let grid = self
            .grid
            .as_ref()
            .ok_or_else(|| KError::InvalidState("ILU(0) has not been set up".into()))?;
        if !r.same_grid(grid) || !z.same_grid(grid) {
            return Err(KError::InvalidState("vectors do not match the factored operator".into()));
        }
        for ((zb, rb), f) in z.boxes_mut().iter_mut().zip(r.boxes()).zip(&self.factors) {
            let x = &mut self.work[..f.diag.len()];
            for (g, i, len) in rb.interior_rows() {
                for t in 0..len {
                    x[i + t] = rb.values[g + t].to_f64_lossy();
                }
            }
            f.solve(x);
            for (g, i, len) in rb.interior_rows() {
                for t in 0..len {
                    zb.values[g + t] = T::from_f64_lossy(x[i + t]);
                }
            }
        }
        Ok(())
    }

    fn destroy(&mut self) {
        self.factors = Vec::new();
        self.work = Vec::new();
        self.grid = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::{KrylovVector, MatVec};
    use crate::grid::StructStencil;
    use crate::parallel::{Comm, SerialComm};
    use approx::assert_abs_diff_eq;

    fn grid(boxes: &[(i64, i64)]) -> Rc<StructGrid> {
        let comm: Rc<dyn Comm> = Rc::new(SerialComm::new());
        let mut g = StructGrid::new(1, comm).unwrap();
        for &(lo, hi) in boxes {
            g.set_extents(&[lo], &[hi]).unwrap();
        }
        g.assemble().unwrap();
        Rc::new(g)
    }

    fn laplacian(g: &Rc<StructGrid>) -> StructMatrix<f64> {
        let s = StructStencil::laplacian(1).unwrap();
        let mut a = StructMatrix::new(g, &s).unwrap();
        a.set_constant_values(&[0, 1, 2], &[2.0, -1.0, -1.0]).unwrap();
        a.assemble().unwrap();
        a
    }

    #[test]
    fn tridiagonal_factor_is_exact() {
        // ILU(0) of a tridiagonal matrix has no dropped fill
        let g = grid(&[(0, 5)]);
        let a = laplacian(&g);
        let mut pc = StructIlu0::new();
        pc.setup(&a).unwrap();
        let mut x = StructVector::new(&g).unwrap();
        x.set_values(&[0], &[5], &[1.0, -2.0, 3.0, 0.5, 0.0, 4.0]).unwrap();
        let mut b = x.zeros_like();
        a.matvec(&mut x, &mut b).unwrap();
        let mut z = x.zeros_like();
        pc.apply(&a, &b, &mut z).unwrap();
        for (got, want) in z.get_values(&[0], &[5]).unwrap().iter().zip(x.get_values(&[0], &[5]).unwrap()) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-12);
        }
    }

    #[test]
    fn boxes_are_factored_independently() {
        let g = grid(&[(0, 1), (2, 3)]);
        let a = laplacian(&g);
        let mut pc = StructIlu0::new();
        pc.setup(&a).unwrap();
        let mut r = StructVector::new(&g).unwrap();
        r.set_values(&[0], &[3], &[1.0, 1.0, 1.0, 1.0]).unwrap();
        let mut z = r.zeros_like();
        pc.apply(&a, &r, &mut z).unwrap();
        // each box solves [[2,-1],[-1,2]] z = 1
        for v in z.get_values(&[0], &[3]).unwrap() {
            assert_abs_diff_eq!(v, 1.0, epsilon = 1e-14);
        }
    }

    #[test]
    fn zero_pivot_is_singular() {
        let g = grid(&[(0, 2)]);
        let s = StructStencil::laplacian(1).unwrap();
        let mut a = StructMatrix::<f64>::new(&g, &s).unwrap();
        a.set_constant_values(&[0, 1, 2], &[1.0, -1.0, -1.0]).unwrap();
        a.assemble().unwrap();
        // row 1 pivot: 1 - (-1)(-1)/1 = 0
        let mut pc = StructIlu0::new();
        let r: Result<(), KError> = Preconditioner::<StructMatrix<f64>, StructVector<f64>>::setup(&mut pc, &a);
        assert!(matches!(r, Err(KError::SingularOperator(_))));
    }
}
