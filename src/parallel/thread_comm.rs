//! In-process communicator: each rank is a thread, messages travel over
//! channels.
//!
//! Collectives send the local contribution to every peer and combine the
//! gathered values in rank order, so every rank computes a bit-identical
//! result. Sends never block; a receive blocks until the matching message
//! (source rank and tag) arrives, buffering anything else that shows up
//! first. Messages between one pair of ranks with the same tag are matched in
//! the order they were sent.
//!
//! # Example
//! ```
//! use kryst_struct::parallel::{Comm, ReduceOp, ThreadComm};
//! let comms = ThreadComm::group(3);
//! std::thread::scope(|s| {
//!     for comm in comms {
//!         s.spawn(move || {
//!             let total = comm.all_reduce(comm.rank() as f64, ReduceOp::Sum).unwrap();
//!             assert_eq!(total, 3.0);
//!         });
//!     }
//! });
//! ```

use super::{check_len, check_user_tag, Comm, Envelope, Message, ReduceOp};
use crate::error::KError;
use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

const REDUCE_TAG: i32 = -1;
const GATHER_TAG: i32 = -2;

enum Payload {
    Values(Vec<f64>),
    Scalar(f64),
    Indices(Vec<i64>),
}

struct Packet {
    src: usize,
    tag: i32,
    payload: Payload,
}

struct Inbox {
    rx: Receiver<Packet>,
    pending: VecDeque<Packet>,
}

/// One rank of an in-process communicator group.
pub struct ThreadComm {
    rank: usize,
    size: usize,
    peers: Vec<Sender<Packet>>,
    inbox: Mutex<Inbox>,
}

impl ThreadComm {
    /// Create `size` connected ranks; hand each one to its own thread.
    pub fn group(size: usize) -> Vec<ThreadComm> {
        let (txs, rxs): (Vec<_>, Vec<_>) = (0..size).map(|_| channel::<Packet>()).unzip();
        rxs.into_iter()
            .enumerate()
            .map(|(rank, rx)| ThreadComm {
                rank,
                size,
                peers: txs.clone(),
                inbox: Mutex::new(Inbox { rx, pending: VecDeque::new() }),
            })
            .collect()
    }

    fn send(&self, dest: usize, tag: i32, payload: Payload) -> Result<(), KError> {
        let tx = self.peers.get(dest).ok_or_else(|| {
            KError::InvalidArgument(format!("rank {dest} outside communicator of size {}", self.size))
        })?;
        tx.send(Packet { src: self.rank, tag, payload })
            .map_err(|_| KError::Communication(format!("rank {dest} has hung up")))
    }

    fn recv(&self, src: usize, tag: i32) -> Result<Payload, KError> {
        let mut inbox = self
            .inbox
            .lock()
            .map_err(|_| KError::Communication(format!("inbox of rank {} poisoned", self.rank)))?;
        if let Some(pos) = inbox.pending.iter().position(|p| p.src == src && p.tag == tag) {
            if let Some(packet) = inbox.pending.remove(pos) {
                return Ok(packet.payload);
            }
        }
        loop {
            let packet = inbox.rx.recv().map_err(|_| {
                KError::Communication(format!("rank {} lost all peers while waiting for rank {src}", self.rank))
            })?;
            if packet.src == src && packet.tag == tag {
                return Ok(packet.payload);
            }
            inbox.pending.push_back(packet);
        }
    }

    fn broadcast(&self, tag: i32, make: impl Fn() -> Payload) -> Result<(), KError> {
        for dest in (0..self.size).filter(|&d| d != self.rank) {
            self.send(dest, tag, make())?;
        }
        Ok(())
    }
}

impl Comm for ThreadComm {
    fn rank(&self) -> usize { self.rank }
    fn size(&self) -> usize { self.size }

    fn barrier(&self) -> Result<(), KError> {
        self.all_reduce(0.0, ReduceOp::Sum).map(|_| ())
    }

    fn all_reduce(&self, x: f64, op: ReduceOp) -> Result<f64, KError> {
        self.broadcast(REDUCE_TAG, || Payload::Scalar(x))?;
        let mut acc: Option<f64> = None;
        for src in 0..self.size {
            let v = if src == self.rank {
                x
            } else {
                match self.recv(src, REDUCE_TAG)? {
                    Payload::Scalar(v) => v,
                    _ => return Err(KError::Communication(format!("rank {src} sent a non-scalar reduction"))),
                }
            };
            acc = Some(match acc {
                None => v,
                Some(a) => op.combine(a, v),
            });
        }
        Ok(acc.unwrap_or(x))
    }

    fn all_gather_indices(&self, local: &[i64]) -> Result<Vec<Vec<i64>>, KError> {
        self.broadcast(GATHER_TAG, || Payload::Indices(local.to_vec()))?;
        let mut out = Vec::with_capacity(self.size);
        for src in 0..self.size {
            if src == self.rank {
                out.push(local.to_vec());
                continue;
            }
            match self.recv(src, GATHER_TAG)? {
                Payload::Indices(v) => out.push(v),
                _ => return Err(KError::Communication(format!("rank {src} sent a malformed gather"))),
            }
        }
        Ok(out)
    }

    fn exchange(&self, sends: Vec<Message>, recvs: &[Envelope]) -> Result<Vec<Vec<f64>>, KError> {
        for msg in sends {
            check_user_tag(msg.tag)?;
            self.send(msg.peer, msg.tag, Payload::Values(msg.data))?;
        }
        let mut out = Vec::with_capacity(recvs.len());
        for env in recvs {
            check_user_tag(env.tag)?;
            match self.recv(env.peer, env.tag)? {
                Payload::Values(data) => {
                    check_len(env, data.len())?;
                    out.push(data);
                }
                _ => {
                    return Err(KError::Communication(format!(
                        "rank {} sent a collective payload on tag {}",
                        env.peer, env.tag
                    )))
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run<F>(size: usize, f: F)
    where
        F: Fn(ThreadComm) + Sync,
    {
        let comms = ThreadComm::group(size);
        std::thread::scope(|s| {
            for comm in comms {
                let f = &f;
                s.spawn(move || f(comm));
            }
        });
    }

    #[test]
    fn reductions_agree_on_every_rank() {
        run(4, |comm| {
            let r = comm.rank() as f64;
            assert_eq!(comm.all_reduce(r, ReduceOp::Sum).unwrap(), 6.0);
            assert_eq!(comm.all_reduce(r, ReduceOp::Max).unwrap(), 3.0);
            assert_eq!(comm.all_reduce(r, ReduceOp::Min).unwrap(), 0.0);
            comm.barrier().unwrap();
        });
    }

    #[test]
    fn gather_is_in_rank_order() {
        run(3, |comm| {
            let local: Vec<i64> = (0..comm.rank() as i64).collect();
            let all = comm.all_gather_indices(&local).unwrap();
            assert_eq!(all, vec![vec![], vec![0], vec![0, 1]]);
        });
    }

    #[test]
    fn ring_exchange_delivers_to_the_right_peer() {
        run(3, |comm| {
            let (me, n) = (comm.rank(), comm.size());
            let right = (me + 1) % n;
            let left = (me + n - 1) % n;
            let got = comm
                .exchange(
                    vec![Message { peer: right, tag: 7, data: vec![me as f64; me + 1] }],
                    &[Envelope { peer: left, tag: 7, len: left + 1 }],
                )
                .unwrap();
            assert_eq!(got[0], vec![left as f64; left + 1]);
        });
    }

    #[test]
    fn collectives_and_exchanges_interleave() {
        run(2, |comm| {
            let other = 1 - comm.rank();
            // the exchange payload may arrive before the reduction is entered
            let got = comm
                .exchange(
                    vec![Message { peer: other, tag: 0, data: vec![comm.rank() as f64] }],
                    &[Envelope { peer: other, tag: 0, len: 1 }],
                )
                .unwrap();
            let sum = comm.all_reduce(got[0][0], ReduceOp::Sum).unwrap();
            assert_eq!(sum, 1.0);
        });
    }

    #[test]
    fn negative_tags_are_reserved() {
        let comms = ThreadComm::group(1);
        let err = comms[0].exchange(vec![Message { peer: 0, tag: -1, data: vec![] }], &[]);
        assert!(matches!(err, Err(KError::InvalidArgument(_))));
    }
}
