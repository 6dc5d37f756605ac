// Single-rank communicator.

use super::{check_len, check_user_tag, Comm, Envelope, Message, ReduceOp};
use crate::error::KError;

/// The one-process case: collectives are identities and point-to-point
/// traffic can only be addressed to rank 0 itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialComm;

impl SerialComm {
    pub fn new() -> Self {
        SerialComm
    }
}

impl Comm for SerialComm {
    fn rank(&self) -> usize { 0 }
    fn size(&self) -> usize { 1 }
    fn barrier(&self) -> Result<(), KError> { Ok(()) }

    fn all_reduce(&self, x: f64, _op: ReduceOp) -> Result<f64, KError> {
        Ok(x)
    }

    fn all_gather_indices(&self, local: &[i64]) -> Result<Vec<Vec<i64>>, KError> {
        Ok(vec![local.to_vec()])
    }

    fn exchange(&self, sends: Vec<Message>, recvs: &[Envelope]) -> Result<Vec<Vec<f64>>, KError> {
        let mut pending: Vec<Option<Message>> = Vec::with_capacity(sends.len());
        for msg in sends {
            check_user_tag(msg.tag)?;
            if msg.peer != 0 {
                return Err(KError::InvalidArgument(format!(
                    "serial communicator cannot reach rank {}",
                    msg.peer
                )));
            }
            pending.push(Some(msg));
        }
        let mut out = Vec::with_capacity(recvs.len());
        for env in recvs {
            let slot = pending
                .iter_mut()
                .find(|m| m.as_ref().is_some_and(|m| m.peer == env.peer && m.tag == env.tag))
                .and_then(Option::take)
                .ok_or_else(|| {
                    KError::Communication(format!("no message from rank {} with tag {}", env.peer, env.tag))
                })?;
            check_len(env, slot.data.len())?;
            out.push(slot.data);
        }
        Ok(out)
    }
}
