//! Structured-grid stencils: the fixed offset pattern of an operator.

use crate::error::KError;
use crate::grid::index_box::{pad_index, Index};
use crate::utils::lifecycle::Phase;

/// Most entries a stencil may hold.
pub const MAX_STENCIL_SIZE: i64 = 1 << 16;

/// An ordered set of unique offsets, each addressed by a stable entry index.
#[derive(Debug, Clone)]
pub struct StructStencil {
    dim: usize,
    entries: Vec<Option<Index>>,
    phase: Phase,
}

impl StructStencil {
    /// Allocate a stencil of `size` unset entries.
    pub fn new(dim: usize, size: i64) -> Result<Self, KError> {
        if !(1..=3).contains(&dim) {
            return Err(KError::InvalidArgument(format!("stencil dimension {dim} outside [1, 3]")));
        }
        if !(0..=MAX_STENCIL_SIZE).contains(&size) {
            return Err(KError::InvalidArgument(format!(
                "stencil size {size} outside [0, {MAX_STENCIL_SIZE}]"
            )));
        }
        Ok(Self { dim, entries: vec![None; size as usize], phase: Phase::Building })
    }

    /// The (2·dim + 1)-point Laplacian pattern: center first, then −/+ per axis.
    pub fn laplacian(dim: usize) -> Result<Self, KError> {
        let mut s = Self::new(dim, 2 * dim as i64 + 1)?;
        s.set_entry(0, &vec![0; dim])?;
        for d in 0..dim {
            let mut off = vec![0i64; dim];
            off[d] = -1;
            s.set_entry(2 * d as i64 + 1, &off)?;
            off[d] = 1;
            s.set_entry(2 * d as i64 + 2, &off)?;
        }
        Ok(s)
    }

    /// Assign `offset` to entry `index`.
    pub fn set_entry(&mut self, index: i64, offset: &[i64]) -> Result<(), KError> {
        self.phase.ensure_live("stencil")?;
        if index < 0 || index as usize >= self.entries.len() {
            return Err(KError::OutOfRange(format!(
                "stencil entry {index} outside [0, {})",
                self.entries.len()
            )));
        }
        let off = pad_index(self.dim, offset)?;
        let index = index as usize;
        if let Some(other) = self
            .entries
            .iter()
            .enumerate()
            .position(|(i, e)| i != index && *e == Some(off))
        {
            return Err(KError::InvalidArgument(format!(
                "offset {:?} already used by entry {other}",
                &off[..self.dim]
            )));
        }
        self.entries[index] = Some(off);
        Ok(())
    }

    /// Older name for [`set_entry`](Self::set_entry).
    #[deprecated(note = "use set_entry")]
    pub fn set_element(&mut self, index: i64, offset: &[i64]) -> Result<(), KError> {
        self.set_entry(index, offset)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn offset(&self, index: usize) -> Result<Index, KError> {
        self.phase.ensure_live("stencil")?;
        match self.entries.get(index) {
            Some(Some(off)) => Ok(*off),
            Some(None) => Err(KError::InvalidState(format!("stencil entry {index} is unset"))),
            None => Err(KError::OutOfRange(format!("stencil entry {index} outside [0, {})", self.entries.len()))),
        }
    }

    /// All offsets in entry order; fails while any entry is unset.
    pub fn offsets(&self) -> Result<Vec<Index>, KError> {
        (0..self.entries.len()).map(|i| self.offset(i)).collect()
    }

    /// Largest absolute offset component over all set entries.
    pub fn radius(&self) -> usize {
        self.entries
            .iter()
            .flatten()
            .flat_map(|o| o.iter().map(|c| c.unsigned_abs() as usize))
            .max()
            .unwrap_or(0)
    }

    pub fn entry_of(&self, offset: &Index) -> Option<usize> {
        self.entries.iter().position(|e| e.as_ref() == Some(offset))
    }

    /// Entry index of the zero offset, if the stencil has one.
    pub fn diagonal_entry(&self) -> Option<usize> {
        self.entry_of(&[0, 0, 0])
    }

    pub fn destroy(&mut self) -> Result<(), KError> {
        self.phase.destroy("stencil")?;
        self.entries = Vec::new();
        Ok(())
    }

    pub(crate) fn ensure_live(&self) -> Result<(), KError> {
        self.phase.ensure_live("stencil")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_validates_dimension_and_size() {
        assert!(matches!(StructStencil::new(0, 3), Err(KError::InvalidArgument(_))));
        assert!(matches!(StructStencil::new(4, 3), Err(KError::InvalidArgument(_))));
        assert!(matches!(StructStencil::new(2, -1), Err(KError::InvalidArgument(_))));
        assert_eq!(StructStencil::new(3, 0).unwrap().size(), 0);
        assert!(matches!(StructStencil::new(1, i64::MAX), Err(KError::InvalidArgument(_))));
        assert!(matches!(StructStencil::new(1, MAX_STENCIL_SIZE + 1), Err(KError::InvalidArgument(_))));
        assert_eq!(StructStencil::new(1, MAX_STENCIL_SIZE).unwrap().size(), 1 << 16);
    }

    #[test]
    fn out_of_range_entry_leaves_others_intact() {
        let mut s = StructStencil::new(1, 3).unwrap();
        s.set_entry(0, &[-1]).unwrap();
        s.set_entry(1, &[0]).unwrap();
        s.set_entry(2, &[1]).unwrap();
        assert!(matches!(s.set_entry(3, &[2]), Err(KError::OutOfRange(_))));
        assert!(matches!(s.set_entry(-1, &[2]), Err(KError::OutOfRange(_))));
        assert_eq!(s.offsets().unwrap(), vec![[-1, 0, 0], [0, 0, 0], [1, 0, 0]]);
    }

    #[test]
    fn duplicate_offsets_are_rejected() {
        let mut s = StructStencil::new(2, 2).unwrap();
        s.set_entry(0, &[1, 0]).unwrap();
        assert!(matches!(s.set_entry(1, &[1, 0]), Err(KError::InvalidArgument(_))));
        // re-assigning the same entry is allowed
        s.set_entry(0, &[1, 0]).unwrap();
    }

    #[test]
    fn unset_entries_block_use() {
        let mut s = StructStencil::new(2, 2).unwrap();
        s.set_entry(0, &[0, 0]).unwrap();
        assert!(matches!(s.offsets(), Err(KError::InvalidState(_))));
    }

    #[test]
    fn laplacian_layout() {
        let s = StructStencil::laplacian(3).unwrap();
        assert_eq!(s.size(), 7);
        assert_eq!(s.radius(), 1);
        assert_eq!(s.diagonal_entry(), Some(0));
        assert_eq!(s.entry_of(&[0, 0, 1]), Some(6));
    }

    #[test]
    #[allow(deprecated)]
    fn set_element_is_an_alias() {
        let mut s = StructStencil::new(1, 1).unwrap();
        s.set_element(0, &[2]).unwrap();
        assert_eq!(s.radius(), 2);
    }

    #[test]
    fn use_after_destroy() {
        let mut s = StructStencil::laplacian(1).unwrap();
        s.destroy().unwrap();
        assert_eq!(s.destroy(), Err(KError::UseAfterFree("stencil")));
        assert_eq!(s.set_entry(0, &[0]), Err(KError::UseAfterFree("stencil")));
    }
}
