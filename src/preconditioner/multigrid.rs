//! Geometric aggregation multigrid for structured grids.
//!
//! Each coarse point `c` aggregates the fine points `p` with `floor(p / 2) = c`.
//! Prolongation is piecewise constant, restriction is its transpose, and the
//! coarse operators are Galerkin products `Pᵀ A P`, so the coarse stencils stay
//! structured. The hierarchy stops when a coarse grid would not shrink, when
//! coarsened boxes would overlap, or at `max_levels`. The coarsest level is
//! solved with a dense LU factorization when the run is serial and the grid
//! is small, otherwise with damped Jacobi sweeps.

use crate::config::PcOptions;
use crate::core::traits::{KrylovVector, MatVec, Real};
use crate::error::KError;
use crate::grid::index_box::coarsen_index;
use crate::grid::{Index, IndexBox, StructGrid, StructStencil};
use crate::matrix::{StructMatrix, StructVector};
use crate::preconditioner::jacobi::inverse_diagonal;
use crate::preconditioner::Preconditioner;
use faer::linalg::solvers::{FullPivLu, SolveCore};
use faer::{Conj, Mat, MatMut};
use log::debug;
use std::rc::Rc;

struct Level<T: Real> {
    a: StructMatrix<T>,
    inv_diag: Vec<Vec<T>>,
    rhs: StructVector<T>,
    sol: StructVector<T>,
    tmp: StructVector<T>,
}

/// Dense LU of the coarsest operator, unknowns numbered box by box.
struct CoarseDirect {
    lu: FullPivLu<f64>,
    rhs: Vec<f64>,
}

impl CoarseDirect {
    fn new<T: Real>(a: &StructMatrix<T>) -> Self {
        let m = dense_operator(a);
        let n = m.nrows();
        Self { lu: FullPivLu::new(m.as_ref()), rhs: vec![0.0; n] }
    }

    fn solve<T: Real>(&mut self, b: &StructVector<T>, x: &mut StructVector<T>) -> Result<(), KError> {
        let mut start = 0;
        for bb in b.boxes() {
            for (g, i, len) in bb.interior_rows() {
                for t in 0..len {
                    self.rhs[start + i + t] = bb.values[g + t].to_f64_lossy();
                }
            }
            start += bb.interior.volume();
        }
        let n = self.rhs.len();
        self.lu
            .solve_in_place_with_conj(Conj::No, MatMut::from_column_major_slice_mut(&mut self.rhs[..], n, 1));
        if self.rhs.iter().any(|v| !v.is_finite()) {
            return Err(KError::SingularOperator("coarsest operator is singular".into()));
        }
        let mut start = 0;
        for xb in x.boxes_mut() {
            let vol = xb.interior.volume();
            for (g, i, len) in xb.interior_rows().collect::<Vec<_>>() {
                for t in 0..len {
                    xb.values[g + t] = T::from_f64_lossy(self.rhs[start + i + t]);
                }
            }
            start += vol;
        }
        Ok(())
    }
}

/// Assemble a serial structured operator as a dense matrix.
fn dense_operator<T: Real>(a: &StructMatrix<T>) -> Mat<f64> {
    let boxes = a.grid().boxes();
    let starts: Vec<usize> = boxes
        .iter()
        .scan(0, |acc, b| {
            let s = *acc;
            *acc += b.volume();
            Some(s)
        })
        .collect();
    let n = boxes.iter().map(IndexBox::volume).sum();
    let mut m = Mat::<f64>::zeros(n, n);
    for (b, bx) in boxes.iter().enumerate() {
        for (i, p) in bx.points().enumerate() {
            for (e, o) in a.offsets().iter().enumerate() {
                let q = [p[0] + o[0], p[1] + o[1], p[2] + o[2]];
                let owner = if bx.contains(&q) { Some(b) } else { boxes.iter().position(|c| c.contains(&q)) };
                if let Some(c) = owner {
                    m[(starts[b] + i, starts[c] + boxes[c].linear_index(&q))] +=
                        a.coefficients()[b][e][i].to_f64_lossy();
                }
            }
        }
    }
    m
}

/// Collective. The grid of aggregates, or `None` when coarsening would not
/// shrink the problem or would make two boxes overlap.
fn coarsen_grid(fine: &StructGrid) -> Result<Option<StructGrid>, KError> {
    let coarse: Vec<IndexBox> = fine.global_boxes().iter().map(|g| g.extents.coarsen()).collect();
    for (i, a) in coarse.iter().enumerate() {
        if coarse[i + 1..].iter().any(|b| a.intersect(b).is_some()) {
            return Ok(None);
        }
    }
    if coarse.iter().map(IndexBox::volume).sum::<usize>() >= fine.global_size() {
        return Ok(None);
    }
    let dim = fine.dim();
    let mut g = StructGrid::new(dim, fine.comm_handle())?;
    g.set_num_ghost(fine.num_ghost())?;
    for b in fine.boxes() {
        let c = b.coarsen();
        g.set_extents(&c.lower[..dim], &c.upper[..dim])?;
    }
    g.assemble()?;
    Ok(Some(g))
}

/// Galerkin product `Pᵀ A P` for piecewise-constant `P`.
///
/// Fine point `p = 2c + π` coupled through offset `o` lands in aggregate
/// `c + floor((π + o) / 2)`, so the coarse offset depends only on the entry
/// and the parity `π` of `p`.
fn galerkin<T: Real>(a: &StructMatrix<T>, coarse: &Rc<StructGrid>) -> Result<StructMatrix<T>, KError> {
    let dim = coarse.dim();
    let parities: Vec<Index> = (0..1usize << dim)
        .map(|m| {
            let mut p = [0i64; 3];
            for (d, slot) in p.iter_mut().enumerate().take(dim) {
                *slot = ((m >> d) & 1) as i64;
            }
            p
        })
        .collect();
    let np = parities.len();
    let mut offsets: Vec<Index> = vec![[0, 0, 0]];
    let mut table = vec![0usize; a.offsets().len() * np];
    for (e, o) in a.offsets().iter().enumerate() {
        for (k, pi) in parities.iter().enumerate() {
            let co = [
                (pi[0] + o[0]).div_euclid(2),
                (pi[1] + o[1]).div_euclid(2),
                (pi[2] + o[2]).div_euclid(2),
            ];
            table[e * np + k] = match offsets.iter().position(|x| *x == co) {
                Some(idx) => idx,
                None => {
                    offsets.push(co);
                    offsets.len() - 1
                }
            };
        }
    }
    let mut stencil = StructStencil::new(dim, offsets.len() as i64)?;
    for (i, o) in offsets.iter().enumerate() {
        stencil.set_entry(i as i64, &o[..dim])?;
    }

    let fine_boxes = a.grid().boxes();
    let mut coeffs: Vec<Vec<Vec<T>>> = coarse
        .boxes()
        .iter()
        .map(|b| vec![vec![T::zero(); b.volume()]; offsets.len()])
        .collect();
    for (b, fbx) in fine_boxes.iter().enumerate() {
        let cbx = coarse.boxes()[b];
        let fine = &a.coefficients()[b];
        for (i, p) in fbx.points().enumerate() {
            let k = (0..dim).map(|d| (p[d].rem_euclid(2) as usize) << d).sum::<usize>();
            let ci = cbx.linear_index(&coarsen_index(&p));
            for (e, col) in fine.iter().enumerate() {
                let slot = &mut coeffs[b][table[e * np + k]][ci];
                *slot = *slot + col[i];
            }
        }
    }
    StructMatrix::from_coefficients(coarse, &stencil, coeffs)
}

/// Weighted Jacobi: x ← x + ω D⁻¹ (b − A x). With `zero_guess` the incoming
/// `x` is ignored and the first sweep needs no product.
#[allow(clippy::too_many_arguments)]
fn relax<T: Real>(
    a: &StructMatrix<T>,
    inv_diag: &[Vec<T>],
    omega: f64,
    b: &StructVector<T>,
    x: &mut StructVector<T>,
    tmp: &mut StructVector<T>,
    sweeps: usize,
    zero_guess: bool,
) -> Result<(), KError> {
    let w = T::from_f64_lossy(omega);
    let mut first = 0;
    if zero_guess {
        if sweeps == 0 {
            x.fill(0.0);
            return Ok(());
        }
        for ((xb, bb), inv) in x.boxes_mut().iter_mut().zip(b.boxes()).zip(inv_diag) {
            for (g, i, len) in bb.interior_rows() {
                for t in 0..len {
                    xb.values[g + t] = w * inv[i + t] * bb.values[g + t];
                }
            }
        }
        first = 1;
    }
    for _ in first..sweeps {
        a.matvec(x, tmp)?;
        for (((xb, bb), tb), inv) in x.boxes_mut().iter_mut().zip(b.boxes()).zip(tmp.boxes()).zip(inv_diag) {
            for (g, i, len) in bb.interior_rows() {
                for t in 0..len {
                    let r = bb.values[g + t] - tb.values[g + t];
                    xb.values[g + t] = xb.values[g + t] + w * inv[i + t] * r;
                }
            }
        }
    }
    Ok(())
}

/// tmp ← b − A x
fn residual<T: Real>(
    a: &StructMatrix<T>,
    b: &StructVector<T>,
    x: &mut StructVector<T>,
    tmp: &mut StructVector<T>,
) -> Result<(), KError> {
    a.matvec(x, tmp)?;
    for (tb, bb) in tmp.boxes_mut().iter_mut().zip(b.boxes()) {
        for (g, _, len) in bb.interior_rows() {
            for t in 0..len {
                tb.values[g + t] = bb.values[g + t] - tb.values[g + t];
            }
        }
    }
    Ok(())
}

fn restrict<T: Real>(fine: &StructVector<T>, coarse: &mut StructVector<T>) {
    coarse.fill(0.0);
    for (cb, fb) in coarse.boxes_mut().iter_mut().zip(fine.boxes()) {
        for p in fb.interior.points() {
            let ci = cb.ghost.linear_index(&coarsen_index(&p));
            cb.values[ci] = cb.values[ci] + fb.values[fb.ghost.linear_index(&p)];
        }
    }
}

fn prolong_add<T: Real>(coarse: &StructVector<T>, fine: &mut StructVector<T>) {
    for (fb, cb) in fine.boxes_mut().iter_mut().zip(coarse.boxes()) {
        for p in fb.interior.points() {
            let fi = fb.ghost.linear_index(&p);
            fb.values[fi] = fb.values[fi] + cb.values[cb.ghost.linear_index(&coarsen_index(&p))];
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn vcycle<T: Real>(
    opts: &PcOptions,
    a: &StructMatrix<T>,
    inv_diag: &[Vec<T>],
    b: &StructVector<T>,
    x: &mut StructVector<T>,
    tmp: &mut StructVector<T>,
    coarser: &mut [Level<T>],
    direct: Option<&mut CoarseDirect>,
) -> Result<(), KError> {
    let Some((next, rest)) = coarser.split_first_mut() else {
        return match direct {
            Some(lu) => lu.solve(b, x),
            None => relax(a, inv_diag, opts.omega, b, x, tmp, opts.coarse_sweeps, true),
        };
    };
    relax(a, inv_diag, opts.omega, b, x, tmp, opts.pre_sweeps, true)?;
    residual(a, b, x, tmp)?;
    restrict(tmp, &mut next.rhs);
    vcycle(opts, &next.a, &next.inv_diag, &next.rhs, &mut next.sol, &mut next.tmp, rest, direct)?;
    prolong_add(&next.sol, x);
    relax(a, inv_diag, opts.omega, b, x, tmp, opts.post_sweeps, false)
}

/// One V-cycle per application, zero initial guess.
pub struct StructMultigrid<T: Real = f64> {
    opts: PcOptions,
    grid: Option<Rc<StructGrid>>,
    inv_diag: Vec<Vec<T>>,
    tmp: Option<StructVector<T>>,
    levels: Vec<Level<T>>,
    direct: Option<CoarseDirect>,
}

impl<T: Real> StructMultigrid<T> {
    pub fn new(opts: PcOptions) -> Self {
        Self { opts, grid: None, inv_diag: Vec::new(), tmp: None, levels: Vec::new(), direct: None }
    }

    /// Levels in the hierarchy, the fine level included (0 before setup).
    pub fn num_levels(&self) -> usize {
        if self.grid.is_some() { self.levels.len() + 1 } else { 0 }
    }

    /// Operator of coarse level `level` (1 is the first coarse level).
    pub fn coarse_operator(&self, level: usize) -> Option<&StructMatrix<T>> {
        level.checked_sub(1).and_then(|l| self.levels.get(l)).map(|l| &l.a)
    }

    pub fn has_direct_coarse_solve(&self) -> bool {
        self.direct.is_some()
    }
}

impl<T: Real> Preconditioner<StructMatrix<T>, StructVector<T>> for StructMultigrid<T> {
    fn setup(&mut self, a: &StructMatrix<T>) -> Result<(), KError> {
        self.destroy();
        a.ensure_assembled()?;
        self.inv_diag = inverse_diagonal(a)?;
        let mut levels: Vec<Level<T>> = Vec::new();
        let mut grid = Rc::clone(a.grid());
        while levels.len() + 1 < self.opts.max_levels {
            let Some(cg) = coarsen_grid(&grid)? else { break };
            let cg = Rc::new(cg);
            let op = galerkin(levels.last().map_or(a, |l| &l.a), &cg)?;
            let inv_diag = inverse_diagonal(&op)?;
            let rhs = StructVector::new(&cg)?;
            levels.push(Level { a: op, inv_diag, sol: rhs.zeros_like(), tmp: rhs.zeros_like(), rhs });
            grid = cg;
        }
        let coarsest = levels.last().map_or(a, |l| &l.a);
        self.direct = (grid.comm().size() == 1 && grid.global_size() <= self.opts.coarse_direct_max)
            .then(|| CoarseDirect::new(coarsest));
        debug!(
            "multigrid: {} levels, coarsest grid {} points, {} coarse solve",
            levels.len() + 1,
            grid.global_size(),
            if self.direct.is_some() { "direct" } else { "relaxation" }
        );
        self.levels = levels;
        self.tmp = Some(StructVector::new(a.grid())?);
        self.grid = Some(Rc::clone(a.grid()));
        Ok(())
    }

    fn apply(&mut self, a: &StructMatrix<T>, r: &StructVector<T>, z: &mut StructVector<T>) -> Result<(), KError> {
        let (Some(grid), Some(tmp)) = (self.grid.as_ref(), self.tmp.as_mut()) else {
            return Err(KError::InvalidState("multigrid has not been set up".into()));
        };
        if !Rc::ptr_eq(grid, a.grid()) || !r.same_grid(grid) || !z.same_grid(grid) {
            return Err(KError::InvalidState("operands do not match the set-up operator".into()));
        }
        vcycle(&self.opts, a, &self.inv_diag, r, z, tmp, &mut self.levels, self.direct.as_mut())
    }

    fn destroy(&mut self) {
        self.levels = Vec::new();
        self.inv_diag = Vec::new();
        self.tmp = None;
        self.direct = None;
        self.grid = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PcType;
    use crate::parallel::{Comm, SerialComm};
    use approx::assert_abs_diff_eq;

    fn line(n: i64) -> (Rc<StructGrid>, StructMatrix<f64>) {
        let comm: Rc<dyn Comm> = Rc::new(SerialComm::new());
        let mut g = StructGrid::new(1, comm).unwrap();
        g.set_extents(&[0], &[n - 1]).unwrap();
        g.assemble().unwrap();
        let g = Rc::new(g);
        let s = StructStencil::laplacian(1).unwrap();
        let mut a = StructMatrix::new(&g, &s).unwrap();
        a.set_constant_values(&[0, 1, 2], &[2.0, -1.0, -1.0]).unwrap();
        a.assemble().unwrap();
        (g, a)
    }

    #[test]
    fn hierarchy_halves_until_one_point() {
        let (_, a) = line(16);
        let mut mg = StructMultigrid::new(PcOptions::new(PcType::Multigrid));
        assert_eq!(mg.num_levels(), 0);
        mg.setup(&a).unwrap();
        assert_eq!(mg.num_levels(), 5);
        assert!(mg.has_direct_coarse_solve());
    }

    #[test]
    fn galerkin_of_laplacian_is_laplacian() {
        let (_, a) = line(8);
        let mut mg = StructMultigrid::new(PcOptions::new(PcType::Multigrid));
        mg.setup(&a).unwrap();
        let c = mg.coarse_operator(1).unwrap();
        let s = c.stencil();
        let center = s.entry_of(&[0, 0, 0]).unwrap();
        let west = s.entry_of(&[-1, 0, 0]).unwrap();
        let east = s.entry_of(&[1, 0, 0]).unwrap();
        assert_eq!(c.get_values(&[1], &[1], &[west, center, east]).unwrap(), vec![-1.0, 2.0, -1.0]);
        // left boundary aggregate loses its west coupling
        assert_eq!(c.get_values(&[0], &[0], &[west]).unwrap(), vec![0.0]);
    }

    #[test]
    fn single_level_direct_solve_is_exact() {
        let (g, a) = line(6);
        let mut mg = StructMultigrid::new(PcOptions::new(PcType::Multigrid).with_max_levels(1).unwrap());
        mg.setup(&a).unwrap();
        let mut r = StructVector::new(&g).unwrap();
        r.fill(1.0);
        let mut z = r.zeros_like();
        mg.apply(&a, &r, &mut z).unwrap();
        // closed form of -u'' = 1 on 6 points
        let want = [3.0, 5.0, 6.0, 6.0, 5.0, 3.0];
        for (got, w) in z.get_values(&[0], &[5]).unwrap().iter().zip(want) {
            assert_abs_diff_eq!(*got, w, epsilon = 1e-10);
        }
    }

    #[test]
    fn v_cycle_reduces_the_residual_and_is_repeatable() {
        let (g, a) = line(32);
        let opts = PcOptions::new(PcType::Multigrid).with_sweeps(2, 2).with_coarse_direct_max(0);
        let mut mg = StructMultigrid::new(opts);
        mg.setup(&a).unwrap();
        assert!(!mg.has_direct_coarse_solve());
        let mut r = StructVector::new(&g).unwrap();
        r.fill(1.0);
        let mut z1 = r.zeros_like();
        let mut z2 = r.zeros_like();
        mg.apply(&a, &r, &mut z1).unwrap();
        mg.apply(&a, &r, &mut z2).unwrap();
        assert_eq!(z1.get_values(&[0], &[31]).unwrap(), z2.get_values(&[0], &[31]).unwrap());
        let mut az = r.zeros_like();
        a.matvec(&mut z1, &mut az).unwrap();
        az.axpy(-1.0, &r);
        assert!(az.norm().unwrap() < r.norm().unwrap());
    }
}
