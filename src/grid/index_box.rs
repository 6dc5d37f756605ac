//! Axis-aligned integer boxes in up to three dimensions.
//!
//! Indices are always stored three-wide; dimensions beyond the grid's
//! dimension are pinned to `0..=0`. Linear layouts are x-fastest.

use crate::error::KError;

/// A grid index (unused trailing components are zero).
pub type Index = [i64; 3];

/// Largest coordinate magnitude a grid box may use. Keeps extents, ghost
/// growth and layout strides clear of `i64` overflow.
pub const MAX_INDEX: i64 = 1 << 40;

/// Inclusive box `[lower, upper]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IndexBox {
    pub lower: Index,
    pub upper: Index,
}

impl IndexBox {
    pub fn new(lower: Index, upper: Index) -> Self {
        Self { lower, upper }
    }

    /// Build a box from `dim`-long corner slices.
    pub fn from_slices(dim: usize, lower: &[i64], upper: &[i64]) -> Result<Self, KError> {
        Ok(Self { lower: pad_index(dim, lower)?, upper: pad_index(dim, upper)? })
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|d| self.upper[d] < self.lower[d])
    }

    pub fn extent(&self, d: usize) -> usize {
        (self.upper[d] - self.lower[d] + 1).max(0) as usize
    }

    /// Point count, or `None` when it does not fit in `usize`.
    pub fn checked_volume(&self) -> Option<usize> {
        (0..3).try_fold(1usize, |acc, d| {
            let n = self.upper[d].checked_sub(self.lower[d])?.checked_add(1)?.max(0);
            acc.checked_mul(usize::try_from(n).ok()?)
        })
    }

    pub fn volume(&self) -> usize {
        (0..3).map(|d| self.extent(d)).product()
    }

    pub fn contains(&self, p: &Index) -> bool {
        (0..3).all(|d| self.lower[d] <= p[d] && p[d] <= self.upper[d])
    }

    pub fn contains_box(&self, other: &IndexBox) -> bool {
        other.is_empty() || (self.contains(&other.lower) && self.contains(&other.upper))
    }

    pub fn intersect(&self, other: &IndexBox) -> Option<IndexBox> {
        let mut out = *self;
        for d in 0..3 {
            out.lower[d] = self.lower[d].max(other.lower[d]);
            out.upper[d] = self.upper[d].min(other.upper[d]);
        }
        (!out.is_empty()).then_some(out)
    }

    /// Expand by `width` on both sides of the first `dim` axes.
    pub fn grow(&self, dim: usize, width: usize) -> IndexBox {
        let mut out = *self;
        for d in 0..dim {
            out.lower[d] -= width as i64;
            out.upper[d] += width as i64;
        }
        out
    }

    /// Index of the aggregate `floor(p / 2)` containing each point.
    pub fn coarsen(&self) -> IndexBox {
        IndexBox { lower: coarsen_index(&self.lower), upper: coarsen_index(&self.upper) }
    }

    /// Position of `p` in this box's x-fastest layout. `p` must lie inside.
    pub fn linear_index(&self, p: &Index) -> usize {
        let nx = self.extent(0);
        let ny = self.extent(1);
        let i = (p[0] - self.lower[0]) as usize;
        let j = (p[1] - self.lower[1]) as usize;
        let k = (p[2] - self.lower[2]) as usize;
        i + nx * (j + ny * k)
    }

    /// Signed linear distance of `offset` in this box's layout.
    pub fn stride_offset(&self, offset: &Index) -> isize {
        let nx = self.extent(0) as isize;
        let ny = self.extent(1) as isize;
        offset[0] as isize + nx * (offset[1] as isize + ny * offset[2] as isize)
    }

    /// All points, x fastest.
    pub fn points(self) -> impl Iterator<Item = Index> {
        let (lo, hi) = (self.lower, self.upper);
        (lo[2]..=hi[2]).flat_map(move |z| {
            (lo[1]..=hi[1]).flat_map(move |y| (lo[0]..=hi[0]).map(move |x| [x, y, z]))
        })
    }

    /// The x-rows of `self`, each as `(start in a, start in b, length)` for
    /// two enclosing layouts `a` and `b`.
    pub fn row_spans(self, a: IndexBox, b: IndexBox) -> impl Iterator<Item = (usize, usize, usize)> {
        let (lo, hi) = (self.lower, self.upper);
        let len = self.extent(0);
        (lo[2]..=hi[2]).flat_map(move |z| {
            (lo[1]..=hi[1]).map(move |y| {
                let p = [lo[0], y, z];
                (a.linear_index(&p), b.linear_index(&p), len)
            })
        })
    }
}

pub fn coarsen_index(p: &Index) -> Index {
    [p[0].div_euclid(2), p[1].div_euclid(2), p[2].div_euclid(2)]
}

pub(crate) fn pad_index(dim: usize, v: &[i64]) -> Result<Index, KError> {
    if v.len() != dim {
        return Err(KError::InvalidArgument(format!(
            "index has {} components, grid dimension is {dim}",
            v.len()
        )));
    }
    let mut out = [0i64; 3];
    out[..dim].copy_from_slice(v);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_and_volume() {
        let a = IndexBox::new([0, 0, 0], [3, 3, 0]);
        let b = IndexBox::new([2, 1, 0], [5, 1, 0]);
        let c = a.intersect(&b).unwrap();
        assert_eq!(c, IndexBox::new([2, 1, 0], [3, 1, 0]));
        assert_eq!(c.volume(), 2);
        assert!(a.intersect(&IndexBox::new([4, 0, 0], [4, 0, 0])).is_none());
    }

    #[test]
    fn linear_index_is_x_fastest() {
        let b = IndexBox::new([1, 1, 0], [3, 2, 0]);
        let order: Vec<usize> = b.points().map(|p| b.linear_index(&p)).collect();
        assert_eq!(order, (0..6).collect::<Vec<_>>());
        assert_eq!(b.stride_offset(&[0, 1, 0]), 3);
        assert_eq!(b.stride_offset(&[-1, -1, 0]), -4);
    }

    #[test]
    fn grow_only_touches_active_dimensions() {
        let b = IndexBox::new([0, 0, 0], [4, 0, 0]).grow(1, 2);
        assert_eq!(b, IndexBox::new([-2, 0, 0], [6, 0, 0]));
    }

    #[test]
    fn coarsen_uses_floor_division() {
        let b = IndexBox::new([-3, 0, 0], [4, 5, 0]).coarsen();
        assert_eq!(b, IndexBox::new([-2, 0, 0], [2, 2, 0]));
    }

    #[test]
    fn row_spans_cover_the_box() {
        let outer = IndexBox::new([0, 0, 0], [4, 4, 0]);
        let inner = IndexBox::new([1, 2, 0], [3, 3, 0]);
        let rows: Vec<_> = inner.row_spans(outer, inner).collect();
        assert_eq!(rows, vec![(11, 0, 3), (16, 3, 3)]);
    }

    #[test]
    fn checked_volume_reports_overflow() {
        assert_eq!(IndexBox::new([0, 0, 0], [3, 1, 0]).checked_volume(), Some(8));
        assert_eq!(IndexBox::new([1, 0, 0], [0, 0, 0]).checked_volume(), Some(0));
        assert_eq!(IndexBox::new([i64::MIN, 0, 0], [i64::MAX, 0, 0]).checked_volume(), None);
        let wide = IndexBox::new([0, 0, 0], [MAX_INDEX, MAX_INDEX, MAX_INDEX]);
        assert_eq!(wide.checked_volume(), None);
    }

    #[test]
    fn slices_must_match_dimension() {
        assert!(IndexBox::from_slices(2, &[0, 0], &[1, 1]).is_ok());
        assert!(matches!(
            IndexBox::from_slices(2, &[0], &[1, 1]),
            Err(KError::InvalidArgument(_))
        ));
    }
}
