//! Inter-rank communication: collectives, point-to-point exchange and the
//! halo-exchange package built on top of them.
//!
//! One `Comm` instance belongs to one rank and is driven by a single thread
//! (SPMD). Every collective must be entered by all ranks in the same order.

use crate::error::KError;

pub mod halo;
pub use halo::{CommPkg, GhostedField};

pub mod serial_comm;
pub use serial_comm::SerialComm;

pub mod thread_comm;
pub use thread_comm::ThreadComm;

#[cfg(feature = "mpi")]
pub mod mpi_comm;
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;

/// Reduction applied by [`Comm::all_reduce`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
}

impl ReduceOp {
    pub fn combine(self, a: f64, b: f64) -> f64 {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Max => a.max(b),
            ReduceOp::Min => a.min(b),
        }
    }
}

/// Outgoing point-to-point payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub peer: usize,
    pub tag: i32,
    pub data: Vec<f64>,
}

/// Expected incoming payload: source rank, tag and exact length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub peer: usize,
    pub tag: i32,
    pub len: usize,
}

pub trait Comm {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self) -> Result<(), KError>;
    /// Combine one value from every rank; all ranks receive the same result.
    fn all_reduce(&self, x: f64, op: ReduceOp) -> Result<f64, KError>;
    /// Gather a variable-length index list from every rank, in rank order.
    fn all_gather_indices(&self, local: &[i64]) -> Result<Vec<Vec<i64>>, KError>;
    /// Post every send and receive without blocking, then wait for all of
    /// them. Returns the received payloads in `recvs` order.
    fn exchange(&self, sends: Vec<Message>, recvs: &[Envelope]) -> Result<Vec<Vec<f64>>, KError>;

    /// Local partial sum in f64 followed by a global sum.
    fn dot(&self, a: &[f64], b: &[f64]) -> Result<f64, KError> {
        let local = a.iter().zip(b).map(|(&x, &y)| x * y).sum::<f64>();
        self.all_reduce(local, ReduceOp::Sum)
    }
}

/// Reject tags the transports reserve for their own collectives.
pub(crate) fn check_user_tag(tag: i32) -> Result<(), KError> {
    if tag < 0 {
        return Err(KError::InvalidArgument(format!("message tag {tag} is reserved")));
    }
    Ok(())
}

/// Check a received payload against its envelope.
pub(crate) fn check_len(env: &Envelope, got: usize) -> Result<(), KError> {
    if env.len != got {
        return Err(KError::Communication(format!(
            "message from rank {} tag {} has {} values, expected {}",
            env.peer, env.tag, got, env.len
        )));
    }
    Ok(())
}
