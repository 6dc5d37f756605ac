//! Stencil matrices on structured grids.
//!
//! Coefficients are stored per local box, per stencil entry, over the box
//! interior (x fastest). Row `p` of the operator couples `p` to `p + o` for
//! each stencil offset `o`; neighbor values come from the ghost layer of the
//! input vector.

use crate::core::traits::{MatVec, Real};
use crate::error::KError;
use crate::grid::{Index, IndexBox, StructGrid, StructStencil};
use crate::matrix::struct_vector::{check_region, StructVector, VectorBox};
use crate::parallel::ReduceOp;
use crate::utils::lifecycle::Phase;
use log::debug;
use std::rc::Rc;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

#[derive(Clone, Debug)]
pub struct StructMatrix<T: Real = f64> {
    grid: Rc<StructGrid>,
    stencil: StructStencil,
    offsets: Vec<Index>,
    /// `coeffs[box][entry][point]`
    coeffs: Vec<Vec<Vec<T>>>,
    phase: Phase,
}

impl<T: Real> StructMatrix<T> {
    /// Zero matrix with the sparsity pattern of `stencil`.
    pub fn new(grid: &Rc<StructGrid>, stencil: &StructStencil) -> Result<Self, KError> {
        grid.ensure_assembled()?;
        stencil.ensure_live()?;
        if stencil.dim() != grid.dim() {
            return Err(KError::InvalidArgument(format!(
                "stencil dimension {} does not match grid dimension {}",
                stencil.dim(),
                grid.dim()
            )));
        }
        let offsets = stencil.offsets()?;
        if stencil.radius() > grid.num_ghost() {
            return Err(KError::InvalidArgument(format!(
                "stencil radius {} exceeds ghost width {}",
                stencil.radius(),
                grid.num_ghost()
            )));
        }
        let coeffs = grid
            .boxes()
            .iter()
            .map(|b| vec![vec![T::zero(); b.volume()]; offsets.len()])
            .collect();
        Ok(Self {
            grid: Rc::clone(grid),
            stencil: stencil.clone(),
            offsets,
            coeffs,
            phase: Phase::Building,
        })
    }

    pub(crate) fn from_coefficients(
        grid: &Rc<StructGrid>,
        stencil: &StructStencil,
        coeffs: Vec<Vec<Vec<T>>>,
    ) -> Result<Self, KError> {
        let mut m = Self::new(grid, stencil)?;
        if coeffs.len() != m.coeffs.len() {
            return Err(KError::InvalidArgument("coefficient boxes do not match the grid".into()));
        }
        m.coeffs = coeffs;
        m.assemble()?;
        Ok(m)
    }

    pub fn grid(&self) -> &Rc<StructGrid> {
        &self.grid
    }

    pub fn stencil(&self) -> &StructStencil {
        &self.stencil
    }

    fn check_entries(&self, entries: &[usize]) -> Result<(), KError> {
        match entries.iter().find(|&&e| e >= self.offsets.len()) {
            Some(e) => Err(KError::OutOfRange(format!(
                "stencil entry {e} outside [0, {})",
                self.offsets.len()
            ))),
            None => Ok(()),
        }
    }

    fn write_region(
        &mut self,
        lower: &[i64],
        upper: &[i64],
        entries: &[usize],
        values: &[T],
        op: impl Fn(&mut T, T),
    ) -> Result<(), KError> {
        self.phase.ensure_live("matrix")?;
        let region = IndexBox::from_slices(self.grid.dim(), lower, upper)?;
        check_region(self.grid.boxes(), &region)?;
        self.check_entries(entries)?;
        let ne = entries.len();
        if values.len() != region.volume() * ne {
            return Err(KError::InvalidArgument(format!(
                "{} values for {} points x {} entries",
                values.len(),
                region.volume(),
                ne
            )));
        }
        for (b, bx) in self.grid.boxes().iter().enumerate() {
            let Some(piece) = bx.intersect(&region) else { continue };
            for (r, i, len) in piece.row_spans(region, *bx) {
                for t in 0..len {
                    for (k, &e) in entries.iter().enumerate() {
                        op(&mut self.coeffs[b][e][i + t], values[(r + t) * ne + k]);
                    }
                }
            }
        }
        self.phase = Phase::Building;
        Ok(())
    }

    /// Set coefficients of `entries` over `[lower, upper]`. Values are
    /// ordered with the entry index fastest, then x, then y, then z.
    pub fn set_values(
        &mut self,
        lower: &[i64],
        upper: &[i64],
        entries: &[usize],
        values: &[T],
    ) -> Result<(), KError> {
        self.write_region(lower, upper, entries, values, |d, s| *d = s)
    }

    pub fn add_to_values(
        &mut self,
        lower: &[i64],
        upper: &[i64],
        entries: &[usize],
        values: &[T],
    ) -> Result<(), KError> {
        self.write_region(lower, upper, entries, values, |d, s| *d = *d + s)
    }

    /// Set `entries[k]` to `values[k]` at every local point.
    pub fn set_constant_values(&mut self, entries: &[usize], values: &[T]) -> Result<(), KError> {
        self.phase.ensure_live("matrix")?;
        self.check_entries(entries)?;
        if values.len() != entries.len() {
            return Err(KError::InvalidArgument(format!(
                "{} values for {} entries",
                values.len(),
                entries.len()
            )));
        }
        for boxed in &mut self.coeffs {
            for (&e, &v) in entries.iter().zip(values) {
                boxed[e].iter_mut().for_each(|c| *c = v);
            }
        }
        self.phase = Phase::Building;
        Ok(())
    }

    pub fn get_values(&self, lower: &[i64], upper: &[i64], entries: &[usize]) -> Result<Vec<T>, KError> {
        self.phase.ensure_live("matrix")?;
        let region = IndexBox::from_slices(self.grid.dim(), lower, upper)?;
        check_region(self.grid.boxes(), &region)?;
        self.check_entries(entries)?;
        let ne = entries.len();
        let mut out = vec![T::zero(); region.volume() * ne];
        for (b, bx) in self.grid.boxes().iter().enumerate() {
            let Some(piece) = bx.intersect(&region) else { continue };
            for (r, i, len) in piece.row_spans(region, *bx) {
                for t in 0..len {
                    for (k, &e) in entries.iter().enumerate() {
                        out[(r + t) * ne + k] = self.coeffs[b][e][i + t];
                    }
                }
            }
        }
        Ok(out)
    }

    /// Collective. Drops couplings to points outside the global domain and
    /// checks that every coefficient is finite on every rank.
    pub fn assemble(&mut self) -> Result<(), KError> {
        self.phase.ensure_live("matrix")?;
        let mut dropped = 0usize;
        for (b, bx) in self.grid.boxes().iter().enumerate() {
            for (e, off) in self.offsets.iter().enumerate() {
                if *off == [0, 0, 0] {
                    continue;
                }
                for (i, p) in bx.points().enumerate() {
                    let q = [p[0] + off[0], p[1] + off[1], p[2] + off[2]];
                    if !bx.contains(&q) && !self.grid.in_domain_near(b, &q) {
                        let c = &mut self.coeffs[b][e][i];
                        if *c != T::zero() {
                            dropped += 1;
                        }
                        *c = T::zero();
                    }
                }
            }
        }
        let bad = self.coeffs.iter().flatten().flatten().any(|c| !c.is_finite());
        let any_bad = self.grid.comm().all_reduce(if bad { 1.0 } else { 0.0 }, ReduceOp::Max)?;
        if any_bad > 0.0 {
            return Err(KError::InvalidArgument(if bad {
                "matrix has non-finite coefficients".into()
            } else {
                "another rank holds non-finite matrix coefficients".into()
            }));
        }
        if dropped > 0 {
            debug!("rank {}: dropped {dropped} couplings to points outside the grid", self.grid.comm().rank());
        }
        self.phase = Phase::Assembled;
        Ok(())
    }

    pub fn ensure_assembled(&self) -> Result<(), KError> {
        self.phase.ensure_assembled("matrix")
    }

    /// y = A x. The ghost layer of `x` must be current (see
    /// [`StructVector::update_ghosts`]); no communication happens here.
    pub fn apply(&self, x: &StructVector<T>, y: &mut StructVector<T>) -> Result<(), KError> {
        self.ensure_assembled()?;
        x.ensure_live()?;
        y.ensure_live()?;
        if !x.same_grid(&self.grid) || !y.same_grid(&self.grid) {
            return Err(KError::InvalidArgument("vector and matrix live on different grids".into()));
        }
        if !x.halo_is_valid() {
            return Err(KError::InvalidState("input vector has a stale ghost layer".into()));
        }
        let offsets = &self.offsets;
        let ys = y.boxes_mut();
        #[cfg(feature = "rayon")]
        ys.par_iter_mut()
            .zip(x.boxes().par_iter())
            .zip(self.coeffs.par_iter())
            .for_each(|((yb, xb), c)| stencil_kernel(offsets, c, xb, yb));
        #[cfg(not(feature = "rayon"))]
        ys.iter_mut()
            .zip(x.boxes())
            .zip(&self.coeffs)
            .for_each(|((yb, xb), c)| stencil_kernel(offsets, c, xb, yb));
        Ok(())
    }

    /// Main diagonal per local box (interior layout).
    pub fn diagonal(&self) -> Result<Vec<Vec<T>>, KError> {
        self.phase.ensure_live("matrix")?;
        let e = self
            .stencil
            .diagonal_entry()
            .ok_or_else(|| KError::SingularOperator("stencil has no zero offset".into()))?;
        Ok(self.coeffs.iter().map(|c| c[e].clone()).collect())
    }

    pub(crate) fn offsets(&self) -> &[Index] {
        &self.offsets
    }

    pub(crate) fn coefficients(&self) -> &[Vec<Vec<T>>] {
        &self.coeffs
    }

    pub fn destroy(&mut self) -> Result<(), KError> {
        self.phase.destroy("matrix")?;
        self.coeffs = Vec::new();
        Ok(())
    }
}

fn stencil_kernel<T: Real>(offsets: &[Index], coeffs: &[Vec<T>], xb: &VectorBox<T>, yb: &mut VectorBox<T>) {
    let deltas: Vec<isize> = offsets.iter().map(|o| xb.ghost.stride_offset(o)).collect();
    for (g, i, len) in xb.interior_rows() {
        for t in 0..len {
            let mut acc = T::zero();
            for (c, &d) in coeffs.iter().zip(&deltas) {
                acc = acc + c[i + t] * xb.values[((g + t) as isize + d) as usize];
            }
            yb.values[g + t] = acc;
        }
    }
}

impl<T: Real> MatVec<StructVector<T>> for StructMatrix<T> {
    /// Refreshes the ghost layer of `x`, then applies the stencil.
    fn matvec(&self, x: &mut StructVector<T>, y: &mut StructVector<T>) -> Result<(), KError> {
        x.update_ghosts()?;
        self.apply(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::KrylovVector;
    use crate::parallel::{Comm, SerialComm};

    fn line(n: i64) -> Rc<StructGrid> {
        let comm: Rc<dyn Comm> = Rc::new(SerialComm::new());
        let mut g = StructGrid::new(1, comm).unwrap();
        g.set_extents(&[0], &[n - 1]).unwrap();
        g.assemble().unwrap();
        Rc::new(g)
    }

    fn laplacian_1d(g: &Rc<StructGrid>) -> StructMatrix<f64> {
        let s = StructStencil::laplacian(1).unwrap();
        let mut a = StructMatrix::new(g, &s).unwrap();
        a.set_constant_values(&[0, 1, 2], &[2.0, -1.0, -1.0]).unwrap();
        a.assemble().unwrap();
        a
    }

    #[test]
    fn boundary_couplings_are_dropped() {
        let g = line(4);
        let a = laplacian_1d(&g);
        assert_eq!(a.get_values(&[0], &[0], &[1, 0, 2]).unwrap(), vec![0.0, 2.0, -1.0]);
        assert_eq!(a.get_values(&[3], &[3], &[2]).unwrap(), vec![0.0]);
    }

    #[test]
    fn laplacian_of_constant_vanishes_inside() {
        let g = line(5);
        let a = laplacian_1d(&g);
        let mut x = StructVector::new(&g).unwrap();
        x.fill(1.0);
        let mut y = x.zeros_like();
        assert!(matches!(a.apply(&x, &mut y), Err(KError::InvalidState(_))));
        a.matvec(&mut x, &mut y).unwrap();
        assert_eq!(y.get_values(&[0], &[4]).unwrap(), vec![1.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn entries_vary_fastest() {
        let g = line(2);
        let s = StructStencil::laplacian(1).unwrap();
        let mut a = StructMatrix::<f64>::new(&g, &s).unwrap();
        a.set_values(&[0], &[1], &[0, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(a.get_values(&[0], &[1], &[0]).unwrap(), vec![1.0, 3.0]);
        assert_eq!(a.get_values(&[1], &[1], &[2, 0]).unwrap(), vec![4.0, 3.0]);
        assert!(matches!(a.set_values(&[0], &[0], &[3], &[1.0]), Err(KError::OutOfRange(_))));
        assert!(matches!(a.set_values(&[0], &[2], &[0], &[1.0; 3]), Err(KError::OutOfRange(_))));
    }

    #[test]
    fn modified_matrix_needs_reassembly() {
        let g = line(3);
        let mut a = laplacian_1d(&g);
        a.add_to_values(&[1], &[1], &[0], &[1.0]).unwrap();
        let mut x = StructVector::new(&g).unwrap();
        let mut y = x.zeros_like();
        assert!(matches!(a.matvec(&mut x, &mut y), Err(KError::InvalidState(_))));
        a.assemble().unwrap();
        a.matvec(&mut x, &mut y).unwrap();
    }

    #[test]
    fn creation_checks() {
        let g = line(3);
        let wide = {
            let mut s = StructStencil::new(1, 2).unwrap();
            s.set_entry(0, &[0]).unwrap();
            s.set_entry(1, &[2]).unwrap();
            s
        };
        assert!(matches!(StructMatrix::<f64>::new(&g, &wide), Err(KError::InvalidArgument(_))));
        let s2 = StructStencil::laplacian(2).unwrap();
        assert!(matches!(StructMatrix::<f64>::new(&g, &s2), Err(KError::InvalidArgument(_))));
        let partial = StructStencil::new(1, 2).unwrap();
        assert!(matches!(StructMatrix::<f64>::new(&g, &partial), Err(KError::InvalidState(_))));
    }

    #[test]
    fn non_finite_coefficients_fail_assembly() {
        let g = line(3);
        let s = StructStencil::laplacian(1).unwrap();
        let mut a = StructMatrix::<f64>::new(&g, &s).unwrap();
        a.set_values(&[1], &[1], &[0], &[f64::NAN]).unwrap();
        assert!(matches!(a.assemble(), Err(KError::InvalidArgument(_))));
    }

    #[test]
    fn destroyed_vectors_are_rejected() {
        let g = line(3);
        let a = laplacian_1d(&g);
        let mut x = StructVector::new(&g).unwrap();
        x.fill(1.0);
        let mut y = x.zeros_like();
        let mut dead = x.zeros_like();
        dead.destroy().unwrap();
        assert_eq!(a.apply(&dead, &mut y), Err(KError::UseAfterFree("vector")));
        assert_eq!(a.apply(&x, &mut dead), Err(KError::UseAfterFree("vector")));
        assert_eq!(a.matvec(&mut dead, &mut y), Err(KError::UseAfterFree("vector")));
        assert_eq!(dead.dot(&x), Err(KError::UseAfterFree("vector")));
        assert_eq!(x.dot(&dead), Err(KError::UseAfterFree("vector")));
        assert!(x.norm().is_ok());
    }
}
