//! Distributed structured grids.
//!
//! Each rank contributes a list of disjoint boxes. Assembly gathers every
//! rank's boxes, checks that no two overlap, records which boxes are within
//! ghost distance of each other and precomputes the halo exchange package.

use crate::error::KError;
use crate::grid::index_box::{Index, IndexBox, MAX_INDEX};
use crate::parallel::{Comm, CommPkg};
use crate::utils::lifecycle::Phase;
use log::debug;
use std::fmt;
use std::rc::Rc;

/// A box of the global partition and the rank that owns it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlobalBox {
    pub rank: usize,
    /// Position in the owner's local box list.
    pub local: usize,
    pub extents: IndexBox,
}

/// Widest ghost layer a grid accepts.
pub const MAX_GHOST: usize = 1 << 16;

pub struct StructGrid {
    dim: usize,
    comm: Rc<dyn Comm>,
    boxes: Vec<IndexBox>,
    num_ghost: usize,
    phase: Phase,
    global: Vec<GlobalBox>,
    /// Global id of each local box.
    ids: Vec<usize>,
    /// Per local box: global ids of the boxes its ghost layer touches.
    neighbors: Vec<Vec<usize>>,
    pkg: CommPkg,
}

impl fmt::Debug for StructGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructGrid")
            .field("dim", &self.dim)
            .field("rank", &self.comm.rank())
            .field("boxes", &self.boxes)
            .field("num_ghost", &self.num_ghost)
            .field("phase", &self.phase)
            .finish()
    }
}

impl StructGrid {
    pub fn new(dim: usize, comm: Rc<dyn Comm>) -> Result<Self, KError> {
        if !(1..=3).contains(&dim) {
            return Err(KError::InvalidArgument(format!("grid dimension {dim} outside [1, 3]")));
        }
        Ok(Self {
            dim,
            comm,
            boxes: Vec::new(),
            num_ghost: 1,
            phase: Phase::Building,
            global: Vec::new(),
            ids: Vec::new(),
            neighbors: Vec::new(),
            pkg: CommPkg::default(),
        })
    }

    fn ensure_building(&self) -> Result<(), KError> {
        match self.phase {
            Phase::Building => Ok(()),
            Phase::Assembled => Err(KError::InvalidState("grid is already assembled".into())),
            Phase::Destroyed => Err(KError::UseAfterFree("grid")),
        }
    }

    /// Append the box `[lower, upper]` to this rank's partition.
    pub fn set_extents(&mut self, lower: &[i64], upper: &[i64]) -> Result<(), KError> {
        self.ensure_building()?;
        let bx = IndexBox::from_slices(self.dim, lower, upper)?;
        if bx.is_empty() {
            return Err(KError::InvalidArgument(format!("empty box {lower:?}..{upper:?}")));
        }
        if bx.lower.iter().chain(&bx.upper).any(|c| c.unsigned_abs() > MAX_INDEX as u64) {
            return Err(KError::InvalidArgument(format!(
                "box {lower:?}..{upper:?} has a coordinate beyond ±{MAX_INDEX}"
            )));
        }
        if bx.grow(self.dim, self.num_ghost).checked_volume().is_none() {
            return Err(KError::InvalidArgument(format!("box {lower:?}..{upper:?} is too large to store")));
        }
        self.boxes.push(bx);
        Ok(())
    }

    /// Ghost layer width; must cover the radius of every stencil used on the grid.
    pub fn set_num_ghost(&mut self, width: usize) -> Result<(), KError> {
        self.ensure_building()?;
        if width > MAX_GHOST {
            return Err(KError::InvalidArgument(format!("ghost width {width} exceeds {MAX_GHOST}")));
        }
        if let Some(b) = self.boxes.iter().find(|b| b.grow(self.dim, width).checked_volume().is_none()) {
            return Err(KError::InvalidArgument(format!("ghost width {width} makes box {b:?} too large to store")));
        }
        self.num_ghost = width;
        Ok(())
    }

    /// Collective. Gathers the global partition and builds the exchange package.
    pub fn assemble(&mut self) -> Result<(), KError> {
        self.ensure_building()?;
        let rank = self.comm.rank();
        let mut flat = Vec::with_capacity(6 * self.boxes.len());
        for b in &self.boxes {
            flat.extend_from_slice(&b.lower);
            flat.extend_from_slice(&b.upper);
        }
        let gathered = self.comm.all_gather_indices(&flat)?;
        let mut global = Vec::new();
        for (owner, data) in gathered.iter().enumerate() {
            if data.len() % 6 != 0 {
                return Err(KError::Communication(format!("rank {owner} sent a malformed box list")));
            }
            for (local, c) in data.chunks_exact(6).enumerate() {
                let extents = IndexBox::new([c[0], c[1], c[2]], [c[3], c[4], c[5]]);
                global.push(GlobalBox { rank: owner, local, extents });
            }
        }
        if global.is_empty() {
            return Err(KError::InvalidArgument("grid has no boxes on any rank".into()));
        }
        for (i, a) in global.iter().enumerate() {
            for b in &global[i + 1..] {
                if a.extents.intersect(&b.extents).is_some() {
                    return Err(KError::InvalidArgument(format!(
                        "box {:?} (rank {}) overlaps box {:?} (rank {})",
                        a.extents, a.rank, b.extents, b.rank
                    )));
                }
            }
        }

        self.ids = global
            .iter()
            .enumerate()
            .filter(|(_, g)| g.rank == rank)
            .map(|(id, _)| id)
            .collect();
        self.neighbors = self
            .ids
            .iter()
            .map(|&id| {
                let grown = global[id].extents.grow(self.dim, self.num_ghost);
                global
                    .iter()
                    .enumerate()
                    .filter(|&(other, g)| other != id && grown.intersect(&g.extents).is_some())
                    .map(|(other, _)| other)
                    .collect()
            })
            .collect();
        self.pkg = CommPkg::build(rank, &global, self.dim, self.num_ghost);
        self.global = global;
        self.phase = Phase::Assembled;
        debug!(
            "rank {rank}: grid assembled with {} local / {} global boxes, {} points, {} peers",
            self.boxes.len(),
            self.global.len(),
            self.global_size(),
            self.pkg.peer_count()
        );
        Ok(())
    }

    pub fn destroy(&mut self) -> Result<(), KError> {
        self.phase.destroy("grid")?;
        self.boxes = Vec::new();
        self.global = Vec::new();
        self.ids = Vec::new();
        self.neighbors = Vec::new();
        self.pkg = CommPkg::default();
        Ok(())
    }

    pub fn ensure_assembled(&self) -> Result<(), KError> {
        self.phase.ensure_assembled("grid")
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_ghost(&self) -> usize {
        self.num_ghost
    }

    pub fn comm(&self) -> &dyn Comm {
        self.comm.as_ref()
    }

    pub fn comm_handle(&self) -> Rc<dyn Comm> {
        Rc::clone(&self.comm)
    }

    /// This rank's boxes, in insertion order.
    pub fn boxes(&self) -> &[IndexBox] {
        &self.boxes
    }

    /// Every rank's boxes, ordered by rank then local position.
    pub fn global_boxes(&self) -> &[GlobalBox] {
        &self.global
    }

    pub fn neighbors(&self, local_box: usize) -> &[usize] {
        self.neighbors.get(local_box).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn local_size(&self) -> usize {
        self.boxes.iter().map(IndexBox::volume).sum()
    }

    pub fn global_size(&self) -> usize {
        self.global.iter().map(|g| g.extents.volume()).sum()
    }

    /// Smallest box enclosing the global partition.
    pub fn bounding_box(&self) -> Option<IndexBox> {
        let mut it = self.global.iter().map(|g| g.extents);
        let first = it.next()?;
        Some(it.fold(first, |acc, b| {
            let mut out = acc;
            for d in 0..3 {
                out.lower[d] = acc.lower[d].min(b.lower[d]);
                out.upper[d] = acc.upper[d].max(b.upper[d]);
            }
            out
        }))
    }

    /// Whether `p`, a point within ghost distance of local box `local_box`,
    /// belongs to the global domain.
    pub fn in_domain_near(&self, local_box: usize, p: &Index) -> bool {
        self.boxes.get(local_box).is_some_and(|b| b.contains(p))
            || self.neighbors(local_box).iter().any(|&id| self.global[id].extents.contains(p))
    }

    pub(crate) fn comm_pkg(&self) -> &CommPkg {
        &self.pkg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::SerialComm;

    fn serial() -> Rc<dyn Comm> {
        Rc::new(SerialComm::new())
    }

    #[test]
    fn create_rejects_bad_dimension() {
        assert!(matches!(StructGrid::new(0, serial()), Err(KError::InvalidArgument(_))));
        assert!(matches!(StructGrid::new(4, serial()), Err(KError::InvalidArgument(_))));
    }

    #[test]
    fn neighbors_follow_ghost_width() {
        let mut g = StructGrid::new(2, serial()).unwrap();
        g.set_extents(&[0, 0], &[3, 3]).unwrap();
        g.set_extents(&[4, 0], &[7, 3]).unwrap();
        g.set_extents(&[0, 5], &[3, 7]).unwrap();
        g.assemble().unwrap();
        assert_eq!(g.neighbors(0), &[1]);
        assert_eq!(g.neighbors(2), &[] as &[usize]);
        assert_eq!(g.global_size(), 16 + 16 + 12);
        assert_eq!(g.bounding_box(), Some(IndexBox::new([0, 0, 0], [7, 7, 0])));
        assert!(g.in_domain_near(0, &[4, 2, 0]));
        assert!(!g.in_domain_near(0, &[-1, 2, 0]));
    }

    #[test]
    fn diagonal_neighbors_are_found() {
        let mut g = StructGrid::new(2, serial()).unwrap();
        g.set_extents(&[0, 0], &[1, 1]).unwrap();
        g.set_extents(&[2, 2], &[3, 3]).unwrap();
        g.assemble().unwrap();
        assert_eq!(g.neighbors(0), &[1]);
    }

    #[test]
    fn overlapping_boxes_fail_assembly() {
        let mut g = StructGrid::new(1, serial()).unwrap();
        g.set_extents(&[0], &[5]).unwrap();
        g.set_extents(&[5], &[9]).unwrap();
        assert!(matches!(g.assemble(), Err(KError::InvalidArgument(_))));
    }

    #[test]
    fn assembly_happens_once() {
        let mut g = StructGrid::new(1, serial()).unwrap();
        g.set_extents(&[0], &[5]).unwrap();
        g.assemble().unwrap();
        assert!(matches!(g.assemble(), Err(KError::InvalidState(_))));
        assert!(matches!(g.set_extents(&[6], &[7]), Err(KError::InvalidState(_))));
        g.destroy().unwrap();
        assert_eq!(g.assemble(), Err(KError::UseAfterFree("grid")));
    }

    #[test]
    fn extreme_corners_are_rejected() {
        let mut g = StructGrid::new(1, serial()).unwrap();
        assert!(matches!(g.set_extents(&[i64::MIN], &[i64::MAX]), Err(KError::InvalidArgument(_))));
        assert!(matches!(g.set_extents(&[0], &[MAX_INDEX + 1]), Err(KError::InvalidArgument(_))));
        let mut g3 = StructGrid::new(3, serial()).unwrap();
        let far = [MAX_INDEX; 3];
        assert!(matches!(g3.set_extents(&[0, 0, 0], &far), Err(KError::InvalidArgument(_))));
        assert!(matches!(g.set_num_ghost(MAX_GHOST + 1), Err(KError::InvalidArgument(_))));
        g.set_extents(&[-MAX_INDEX], &[MAX_INDEX]).unwrap();
        g.set_num_ghost(2).unwrap();
        assert_eq!(g.boxes().len(), 1);
    }

    #[test]
    fn empty_grid_and_bad_boxes() {
        let mut g = StructGrid::new(2, serial()).unwrap();
        assert!(matches!(g.set_extents(&[2, 0], &[1, 0]), Err(KError::InvalidArgument(_))));
        assert!(matches!(g.set_extents(&[0], &[1]), Err(KError::InvalidArgument(_))));
        assert!(matches!(g.assemble(), Err(KError::InvalidArgument(_))));
    }
}
