/// MPI-based communicator.
///
/// This module provides an implementation of the `Comm` trait using the MPI (Message Passing Interface)
/// backend for distributed-memory parallelism. The halo exchange posts immediate sends and receives
/// inside one request scope and waits for all of them before returning; reductions and gathers map
/// onto `MPI_Allreduce` and `MPI_Allgatherv`. The implementation is only available when the `mpi`
/// feature is enabled.
///
/// # References
/// - [MPI Standard](https://www.mpi-forum.org/)
///
/// # Example
/// ```no_run
/// # #[cfg(feature = "mpi")]
/// # {
/// use kryst_struct::parallel::{Comm, MpiComm};
/// let comm = MpiComm::init().expect("MPI initialization");
/// println!("Rank: {} / {}", comm.rank(), comm.size());
/// comm.barrier().unwrap();
/// # }
/// ```

use super::{check_len, check_user_tag, Comm, Envelope, Message, ReduceOp};
use crate::error::KError;
use mpi::collective::SystemOperation;
use mpi::datatype::PartitionMut;
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use mpi::Count;

/// MPI communicator wrapper for distributed parallelism.
///
/// Owns the MPI universe, so MPI is finalized when the communicator is dropped.
pub struct MpiComm {
    /// The MPI world communicator (all processes in the job).
    world: SimpleCommunicator,
    rank: usize,
    size: usize,
    _universe: Universe,
}

impl MpiComm {
    /// Initializes MPI and wraps the world communicator.
    pub fn init() -> Result<Self, KError> {
        let universe = mpi::initialize()
            .ok_or_else(|| KError::Communication("MPI was already initialized".into()))?;
        let world = universe.world();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        Ok(MpiComm { world, rank, size, _universe: universe })
    }
}

impl Comm for MpiComm {
    fn rank(&self) -> usize { self.rank }
    fn size(&self) -> usize { self.size }

    fn barrier(&self) -> Result<(), KError> {
        self.world.barrier();
        Ok(())
    }

    fn all_reduce(&self, x: f64, op: ReduceOp) -> Result<f64, KError> {
        let mut y = x;
        let op = match op {
            ReduceOp::Sum => SystemOperation::sum(),
            ReduceOp::Max => SystemOperation::max(),
            ReduceOp::Min => SystemOperation::min(),
        };
        self.world.all_reduce_into(&x, &mut y, &op);
        Ok(y)
    }

    fn all_gather_indices(&self, local: &[i64]) -> Result<Vec<Vec<i64>>, KError> {
        let my_count = local.len() as Count;
        let mut counts = vec![0 as Count; self.size];
        self.world.all_gather_into(&my_count, &mut counts[..]);
        let displs: Vec<Count> = counts
            .iter()
            .scan(0 as Count, |acc, &c| {
                let d = *acc;
                *acc += c;
                Some(d)
            })
            .collect();
        let total: usize = counts.iter().map(|&c| c as usize).sum();
        let mut buf = vec![0i64; total];
        {
            let mut partition = PartitionMut::new(&mut buf[..], &counts[..], &displs[..]);
            self.world.all_gather_varcount_into(local, &mut partition);
        }
        Ok(counts
            .iter()
            .zip(&displs)
            .map(|(&c, &d)| buf[d as usize..(d + c) as usize].to_vec())
            .collect())
    }

    fn exchange(&self, sends: Vec<Message>, recvs: &[Envelope]) -> Result<Vec<Vec<f64>>, KError> {
        for msg in &sends {
            check_user_tag(msg.tag)?;
            if msg.peer >= self.size {
                return Err(KError::InvalidArgument(format!("rank {} outside communicator", msg.peer)));
            }
        }
        for env in recvs {
            check_user_tag(env.tag)?;
        }
        let mut bufs: Vec<Vec<f64>> = recvs.iter().map(|e| vec![0.0; e.len]).collect();
        mpi::request::scope(|scope| {
            let mut recv_reqs = Vec::with_capacity(recvs.len());
            for (env, buf) in recvs.iter().zip(bufs.iter_mut()) {
                recv_reqs.push(
                    self.world
                        .process_at_rank(env.peer as i32)
                        .immediate_receive_into_with_tag(scope, &mut buf[..], env.tag),
                );
            }
            let mut send_reqs = Vec::with_capacity(sends.len());
            for msg in &sends {
                send_reqs.push(
                    self.world
                        .process_at_rank(msg.peer as i32)
                        .immediate_send_with_tag(scope, &msg.data[..], msg.tag),
                );
            }
            for req in recv_reqs {
                req.wait();
            }
            for req in send_reqs {
                req.wait();
            }
        });
        for (env, buf) in recvs.iter().zip(&bufs) {
            check_len(env, buf.len())?;
        }
        Ok(bufs)
    }
}
