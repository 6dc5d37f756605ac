//! Distributed structured-grid vectors.
//!
//! Every local box stores its values over the box grown by the grid's ghost
//! width, x fastest. Ghost points outside the global domain stay zero, which
//! is how homogeneous Dirichlet boundaries enter the stencil product.

use crate::core::traits::{KrylovVector, Real};
use crate::error::KError;
use crate::grid::{Index, IndexBox, StructGrid};
use crate::parallel::{GhostedField, ReduceOp};
use crate::utils::lifecycle::Phase;
use std::rc::Rc;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Values of one local box, including its ghost layer.
#[derive(Clone, Debug)]
pub(crate) struct VectorBox<T> {
    pub(crate) interior: IndexBox,
    pub(crate) ghost: IndexBox,
    pub(crate) values: Vec<T>,
}

impl<T: Real> VectorBox<T> {
    fn zeros(interior: IndexBox, dim: usize, width: usize) -> Self {
        let ghost = interior.grow(dim, width);
        Self { interior, ghost, values: vec![T::zero(); ghost.volume()] }
    }

    /// Interior rows as `(start in ghost layout, start in interior layout, len)`.
    pub(crate) fn interior_rows(&self) -> impl Iterator<Item = (usize, usize, usize)> {
        self.interior.row_spans(self.ghost, self.interior)
    }

    fn dot_interior(&self, other: &Self) -> f64 {
        let mut acc = 0.0;
        for (g, _, len) in self.interior_rows() {
            for (a, b) in self.values[g..g + len].iter().zip(&other.values[g..g + len]) {
                acc += a.to_f64_lossy() * b.to_f64_lossy();
            }
        }
        acc
    }
}

impl<T: Real> GhostedField for [VectorBox<T>] {
    fn pack(&self, local_box: usize, region: &IndexBox, buf: &mut Vec<f64>) {
        let vb = &self[local_box];
        for (start, _, len) in region.row_spans(vb.ghost, vb.ghost) {
            buf.extend(vb.values[start..start + len].iter().map(|v| v.to_f64_lossy()));
        }
    }

    fn unpack(&mut self, local_box: usize, region: &IndexBox, data: &[f64]) {
        let vb = &mut self[local_box];
        let mut at = 0;
        for (start, _, len) in region.row_spans(vb.ghost, vb.ghost) {
            for (dst, &src) in vb.values[start..start + len].iter_mut().zip(&data[at..at + len]) {
                *dst = T::from_f64_lossy(src);
            }
            at += len;
        }
    }

    fn copy_region(&mut self, src: usize, dst: usize, region: &IndexBox) {
        let (s, d) = if src < dst {
            let (lo, hi) = self.split_at_mut(dst);
            (&lo[src], &mut hi[0])
        } else {
            let (lo, hi) = self.split_at_mut(src);
            (&hi[0], &mut lo[dst])
        };
        for (a, b, len) in region.row_spans(s.ghost, d.ghost) {
            d.values[b..b + len].copy_from_slice(&s.values[a..a + len]);
        }
    }
}

/// Check that `region` is non-empty and covered by the local boxes.
pub(crate) fn check_region(boxes: &[IndexBox], region: &IndexBox) -> Result<(), KError> {
    if region.is_empty() {
        return Err(KError::InvalidArgument(format!("empty region {region:?}")));
    }
    let covered: usize = boxes.iter().filter_map(|b| b.intersect(region)).map(|r| r.volume()).sum();
    if covered != region.volume() {
        return Err(KError::OutOfRange(format!(
            "region {:?}..{:?} is not owned by this rank",
            region.lower, region.upper
        )));
    }
    Ok(())
}

/// A vector over a [`StructGrid`], generic over the storage scalar.
#[derive(Clone, Debug)]
pub struct StructVector<T: Real = f64> {
    grid: Rc<StructGrid>,
    boxes: Vec<VectorBox<T>>,
    halo_valid: bool,
    phase: Phase,
}

impl<T: Real> StructVector<T> {
    /// Allocate a zero vector; the grid must be assembled.
    pub fn new(grid: &Rc<StructGrid>) -> Result<Self, KError> {
        grid.ensure_assembled()?;
        let boxes = grid
            .boxes()
            .iter()
            .map(|&b| VectorBox::zeros(b, grid.dim(), grid.num_ghost()))
            .collect();
        Ok(Self { grid: Rc::clone(grid), boxes, halo_valid: true, phase: Phase::Building })
    }

    pub fn grid(&self) -> &Rc<StructGrid> {
        &self.grid
    }

    fn region(&self, lower: &[i64], upper: &[i64]) -> Result<IndexBox, KError> {
        self.phase.ensure_live("vector")?;
        let region = IndexBox::from_slices(self.grid.dim(), lower, upper)?;
        check_region(self.grid.boxes(), &region)?;
        Ok(region)
    }

    fn write_region(
        &mut self,
        lower: &[i64],
        upper: &[i64],
        values: &[T],
        op: impl Fn(&mut T, T),
    ) -> Result<(), KError> {
        let region = self.region(lower, upper)?;
        if values.len() != region.volume() {
            return Err(KError::InvalidArgument(format!(
                "{} values for a region of {} points",
                values.len(),
                region.volume()
            )));
        }
        for vb in &mut self.boxes {
            let Some(piece) = vb.interior.intersect(&region) else { continue };
            for (r, g, len) in piece.row_spans(region, vb.ghost) {
                for (dst, &src) in vb.values[g..g + len].iter_mut().zip(&values[r..r + len]) {
                    op(dst, src);
                }
            }
        }
        self.halo_valid = false;
        Ok(())
    }

    /// Overwrite the values of the sub-box `[lower, upper]` (x fastest).
    pub fn set_values(&mut self, lower: &[i64], upper: &[i64], values: &[T]) -> Result<(), KError> {
        self.write_region(lower, upper, values, |d, s| *d = s)
    }

    pub fn add_to_values(&mut self, lower: &[i64], upper: &[i64], values: &[T]) -> Result<(), KError> {
        self.write_region(lower, upper, values, |d, s| *d = *d + s)
    }

    pub fn set_constant_values(&mut self, value: T) -> Result<(), KError> {
        self.phase.ensure_live("vector")?;
        for vb in &mut self.boxes {
            for (g, _, len) in vb.interior.row_spans(vb.ghost, vb.ghost) {
                vb.values[g..g + len].iter_mut().for_each(|v| *v = value);
            }
        }
        self.halo_valid = false;
        Ok(())
    }

    pub fn get_values(&self, lower: &[i64], upper: &[i64]) -> Result<Vec<T>, KError> {
        let region = self.region(lower, upper)?;
        let mut out = vec![T::zero(); region.volume()];
        for vb in &self.boxes {
            let Some(piece) = vb.interior.intersect(&region) else { continue };
            for (r, g, len) in piece.row_spans(region, vb.ghost) {
                out[r..r + len].copy_from_slice(&vb.values[g..g + len]);
            }
        }
        Ok(out)
    }

    /// Collective. Finalizes the vector and fills its ghost layer.
    pub fn assemble(&mut self) -> Result<(), KError> {
        self.phase.ensure_live("vector")?;
        self.exchange()?;
        self.phase = Phase::Assembled;
        Ok(())
    }

    pub fn ensure_assembled(&self) -> Result<(), KError> {
        self.phase.ensure_assembled("vector")
    }

    fn exchange(&mut self) -> Result<(), KError> {
        self.grid.comm_pkg().exchange(self.grid.comm(), &mut self.boxes[..])?;
        self.halo_valid = true;
        Ok(())
    }

    /// Collective. Refresh the ghost layer from the owning boxes.
    pub fn update_ghosts(&mut self) -> Result<(), KError> {
        self.phase.ensure_live("vector")?;
        if self.halo_valid && self.grid.comm().size() == 1 {
            return Ok(());
        }
        self.exchange()
    }

    pub fn halo_is_valid(&self) -> bool {
        self.halo_valid
    }

    /// Value at `p`, which may lie in the ghost layer of a local box.
    pub fn ghost_value(&self, p: &[i64]) -> Result<T, KError> {
        self.phase.ensure_live("vector")?;
        let idx: Index = crate::grid::index_box::pad_index(self.grid.dim(), p)?;
        if let Some(vb) = self.boxes.iter().find(|vb| vb.interior.contains(&idx)) {
            return Ok(vb.values[vb.ghost.linear_index(&idx)]);
        }
        let vb = self
            .boxes
            .iter()
            .find(|vb| vb.ghost.contains(&idx))
            .ok_or_else(|| KError::OutOfRange(format!("{p:?} is outside every local ghost layer")))?;
        if !self.halo_valid {
            return Err(KError::InvalidState("ghost layer is stale; call update_ghosts".into()));
        }
        Ok(vb.values[vb.ghost.linear_index(&idx)])
    }

    pub fn destroy(&mut self) -> Result<(), KError> {
        self.phase.destroy("vector")?;
        self.boxes = Vec::new();
        Ok(())
    }

    pub(crate) fn boxes(&self) -> &[VectorBox<T>] {
        &self.boxes
    }

    /// Mutable box storage; the caller is assumed to write interior values.
    pub(crate) fn boxes_mut(&mut self) -> &mut [VectorBox<T>] {
        self.halo_valid = false;
        &mut self.boxes
    }

    pub(crate) fn same_grid(&self, grid: &Rc<StructGrid>) -> bool {
        Rc::ptr_eq(&self.grid, grid)
    }

    pub(crate) fn ensure_live(&self) -> Result<(), KError> {
        self.phase.ensure_live("vector")
    }

    fn assert_live(&self) {
        assert!(self.phase != Phase::Destroyed, "vector used after destroy");
    }

    fn assert_layout(&self, other: &Self) {
        self.assert_live();
        other.assert_live();
        assert!(
            self.boxes.len() == other.boxes.len()
                && self.boxes.iter().zip(&other.boxes).all(|(a, b)| a.ghost == b.ghost),
            "vectors live on different grids"
        );
    }
}

impl<T: Real> KrylovVector for StructVector<T> {
    fn zeros_like(&self) -> Self {
        self.assert_live();
        let boxes = self
            .boxes
            .iter()
            .map(|vb| VectorBox { interior: vb.interior, ghost: vb.ghost, values: vec![T::zero(); vb.values.len()] })
            .collect();
        Self { grid: Rc::clone(&self.grid), boxes, halo_valid: true, phase: self.phase }
    }

    fn copy_from(&mut self, src: &Self) {
        self.assert_layout(src);
        for (d, s) in self.boxes.iter_mut().zip(&src.boxes) {
            d.values.copy_from_slice(&s.values);
        }
        self.halo_valid = src.halo_valid;
    }

    fn axpy(&mut self, alpha: f64, x: &Self) {
        self.assert_layout(x);
        let a = T::from_f64_lossy(alpha);
        let kernel = |d: &mut VectorBox<T>, s: &VectorBox<T>| {
            for (yi, &xi) in d.values.iter_mut().zip(&s.values) {
                *yi = *yi + a * xi;
            }
        };
        #[cfg(feature = "rayon")]
        self.boxes.par_iter_mut().zip(x.boxes.par_iter()).for_each(|(d, s)| kernel(d, s));
        #[cfg(not(feature = "rayon"))]
        self.boxes.iter_mut().zip(&x.boxes).for_each(|(d, s)| kernel(d, s));
        self.halo_valid &= x.halo_valid;
    }

    fn scale(&mut self, alpha: f64) {
        self.assert_live();
        let a = T::from_f64_lossy(alpha);
        for vb in &mut self.boxes {
            vb.values.iter_mut().for_each(|v| *v = *v * a);
        }
    }

    fn fill(&mut self, value: f64) {
        self.assert_live();
        let v = T::from_f64_lossy(value);
        for vb in &mut self.boxes {
            for (g, _, len) in vb.interior.row_spans(vb.ghost, vb.ghost) {
                vb.values[g..g + len].iter_mut().for_each(|x| *x = v);
            }
        }
        self.halo_valid = false;
    }

    fn dot(&self, other: &Self) -> Result<f64, KError> {
        self.ensure_live()?;
        other.ensure_live()?;
        self.assert_layout(other);
        #[cfg(feature = "rayon")]
        let partials: Vec<f64> =
            self.boxes.par_iter().zip(other.boxes.par_iter()).map(|(a, b)| a.dot_interior(b)).collect();
        #[cfg(not(feature = "rayon"))]
        let partials: Vec<f64> = self.boxes.iter().zip(&other.boxes).map(|(a, b)| a.dot_interior(b)).collect();
        // box order keeps the sum reproducible
        let local: f64 = partials.iter().sum();
        self.grid.comm().all_reduce(local, ReduceOp::Sum)
    }
}
