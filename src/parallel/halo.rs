//! Halo (ghost layer) exchange package.
//!
//! Built once from the global box list when a grid is assembled. For every
//! ordered pair of distinct boxes `(src, dst)`, the points of `src` that lie
//! in the ghost layer of `dst` must be copied into `dst`'s ghost storage.
//! Pairs owned entirely by this rank become local copies; the rest are
//! grouped into one message per peer rank. Both sides enumerate pairs in the
//! same global order, so packed buffers line up without headers.

use super::{Comm, Envelope, Message};
use crate::error::KError;
use crate::grid::{GlobalBox, IndexBox};
use std::collections::BTreeMap;

const HALO_TAG: i32 = 17;

/// Storage that can take part in a halo exchange.
///
/// Boxes are addressed by their position in the owning rank's box list;
/// regions are always given in global index coordinates.
pub trait GhostedField {
    /// Append the values of `region` (interior of `local_box`) to `buf`, x fastest.
    fn pack(&self, local_box: usize, region: &IndexBox, buf: &mut Vec<f64>);
    /// Write `data` into the ghost storage of `local_box` over `region`.
    fn unpack(&mut self, local_box: usize, region: &IndexBox, data: &[f64]);
    /// Copy `region` from the interior of `src` into the ghost layer of `dst`.
    fn copy_region(&mut self, src: usize, dst: usize, region: &IndexBox);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LocalCopy {
    src: usize,
    dst: usize,
    region: IndexBox,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct PeerTransfer {
    peer: usize,
    /// `(local box, region)` in packing order.
    regions: Vec<(usize, IndexBox)>,
    len: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommPkg {
    local: Vec<LocalCopy>,
    sends: Vec<PeerTransfer>,
    recvs: Vec<PeerTransfer>,
}

impl CommPkg {
    pub fn build(rank: usize, global: &[GlobalBox], dim: usize, num_ghost: usize) -> Self {
        let mut local = Vec::new();
        let mut sends: BTreeMap<usize, PeerTransfer> = BTreeMap::new();
        let mut recvs: BTreeMap<usize, PeerTransfer> = BTreeMap::new();
        if num_ghost == 0 {
            return Self::default();
        }
        for (si, s) in global.iter().enumerate() {
            for (di, d) in global.iter().enumerate() {
                if si == di || (s.rank != rank && d.rank != rank) {
                    continue;
                }
                let Some(region) = d.extents.grow(dim, num_ghost).intersect(&s.extents) else {
                    continue;
                };
                match (s.rank == rank, d.rank == rank) {
                    (true, true) => local.push(LocalCopy { src: s.local, dst: d.local, region }),
                    (true, false) => {
                        let t = sends.entry(d.rank).or_insert_with(|| PeerTransfer { peer: d.rank, ..Default::default() });
                        t.regions.push((s.local, region));
                        t.len += region.volume();
                    }
                    (false, true) => {
                        let t = recvs.entry(s.rank).or_insert_with(|| PeerTransfer { peer: s.rank, ..Default::default() });
                        t.regions.push((d.local, region));
                        t.len += region.volume();
                    }
                    (false, false) => {}
                }
            }
        }
        Self {
            local,
            sends: sends.into_values().collect(),
            recvs: recvs.into_values().collect(),
        }
    }

    /// Distinct ranks this rank sends to or receives from.
    pub fn peer_count(&self) -> usize {
        let mut peers: Vec<usize> = self.sends.iter().chain(&self.recvs).map(|t| t.peer).collect();
        peers.sort_unstable();
        peers.dedup();
        peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.sends.is_empty() && self.recvs.is_empty()
    }

    /// Refresh every ghost value of `field` that lies inside the global domain.
    /// Blocks until all transfers have completed.
    pub fn exchange<F: GhostedField + ?Sized>(&self, comm: &dyn Comm, field: &mut F) -> Result<(), KError> {
        let messages: Vec<Message> = self
            .sends
            .iter()
            .map(|t| {
                let mut data = Vec::with_capacity(t.len);
                for (b, region) in &t.regions {
                    field.pack(*b, region, &mut data);
                }
                Message { peer: t.peer, tag: HALO_TAG, data }
            })
            .collect();
        let envelopes: Vec<Envelope> = self
            .recvs
            .iter()
            .map(|t| Envelope { peer: t.peer, tag: HALO_TAG, len: t.len })
            .collect();
        for c in &self.local {
            field.copy_region(c.src, c.dst, &c.region);
        }
        if messages.is_empty() && envelopes.is_empty() {
            return Ok(());
        }
        let received = comm.exchange(messages, &envelopes)?;
        for (t, data) in self.recvs.iter().zip(&received) {
            let mut at = 0;
            for (b, region) in &t.regions {
                let n = region.volume();
                field.unpack(*b, region, &data[at..at + n]);
                at += n;
            }
        }
        Ok(())
    }
}
