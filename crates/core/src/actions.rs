//! Output batches emitted by the ordering core.
//!
//! Actions are **commands**: they describe sends, hash computations, and
//! write-ahead-log records for the outer loop to execute. The core performs
//! no I/O itself, which is what makes it deterministically replayable from a
//! log of its inputs.

use crate::Msg;
use totem_types::{NodeId, PEntry, QEntry, RequestAck, SeqNo};

/// A message send to a set of peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Send {
    pub targets: Vec<NodeId>,
    pub msg: Msg,
}

/// A client-request forward to a set of peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    pub targets: Vec<NodeId>,
    pub ack: RequestAck,
}

/// Correlation record describing why a hash was requested.
///
/// The outer loop hashes [`HashRequest::data`] and feeds the digest back
/// together with the origin, so the result can be routed to the slot that
/// asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashOrigin {
    /// Digest of the batch proposed at `(epoch, seq_no)` by `source`.
    Batch {
        source: NodeId,
        seq_no: SeqNo,
        epoch: u64,
        batch: Vec<RequestAck>,
    },
    /// Canonical hash of an epoch-change report from `source`, for signing
    /// or signature verification.
    EpochChange { source: NodeId, origin_epoch: u64 },
}

/// A deferred hash computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRequest {
    /// Byte strings to be hashed in order, as one logical input.
    pub data: Vec<Vec<u8>>,
    pub origin: HashOrigin,
}

/// A write-ahead-log record scheduled in this batch.
///
/// The outer loop must make every persist record durable before
/// transmitting any send co-scheduled in the same batch; that ordering is
/// what makes the matching sends safe to emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persist {
    QEntry(QEntry),
    PEntry(PEntry),
}

/// Append-only collector of the core's outputs.
///
/// Composition is associative: concatenating two batches is equivalent to
/// having accumulated into one. No ordering holds across kinds beyond the
/// persist-before-send rule above.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actions {
    pub sends: Vec<Send>,
    pub forwards: Vec<ForwardRequest>,
    pub hashes: Vec<HashRequest>,
    pub persists: Vec<Persist>,
}

impl Actions {
    /// An empty batch.
    pub fn new() -> Self {
        Actions::default()
    }

    /// Schedule `msg` to be sent to every node in `targets`.
    pub fn send(&mut self, targets: &[NodeId], msg: Msg) -> &mut Self {
        self.sends.push(Send {
            targets: targets.to_vec(),
            msg,
        });
        self
    }

    /// Schedule `ack` to be forwarded to every node in `targets`.
    pub fn forward_request(&mut self, targets: &[NodeId], ack: RequestAck) -> &mut Self {
        self.forwards.push(ForwardRequest {
            targets: targets.to_vec(),
            ack,
        });
        self
    }

    /// Schedule a hash computation.
    pub fn hash(&mut self, request: HashRequest) -> &mut Self {
        self.hashes.push(request);
        self
    }

    /// Schedule a write-ahead-log record.
    pub fn persist(&mut self, record: Persist) -> &mut Self {
        self.persists.push(record);
        self
    }

    /// Append all of `other`'s actions to this batch.
    pub fn concat(&mut self, other: Actions) -> &mut Self {
        self.sends.extend(other.sends);
        self.forwards.extend(other.forwards);
        self.hashes.extend(other.hashes);
        self.persists.extend(other.persists);
        self
    }

    /// Whether the batch schedules any work.
    pub fn is_empty(&self) -> bool {
        self.sends.is_empty()
            && self.forwards.is_empty()
            && self.hashes.is_empty()
            && self.persists.is_empty()
    }
}
