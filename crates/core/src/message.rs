//! Protocol wire messages.
//!
//! Framing and serialization are the transport's concern; the core only
//! defines the message shapes and classifies them.

use totem_types::{BucketId, Checkpoint, Digest, EpochChange, NewEpochConfig, RequestAck, SeqNo};

/// All messages a replica can receive from a peer.
///
/// This is a closed sum: the admitter classifies every variant exhaustively,
/// so adding a variant is a compile-time obligation at every match site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// A leader's proposal of a batch for a slot it owns.
    Preprepare {
        seq_no: SeqNo,
        epoch: u64,
        bucket: BucketId,
        batch: Vec<RequestAck>,
    },

    /// A non-leader's attestation to the digest of a preprepared batch.
    Prepare {
        seq_no: SeqNo,
        epoch: u64,
        bucket: BucketId,
        digest: Digest,
    },

    /// An attestation that a quorum of prepares was observed.
    Commit {
        seq_no: SeqNo,
        epoch: u64,
        bucket: BucketId,
        digest: Digest,
    },

    /// A log-truncation point attestation.
    Checkpoint(Checkpoint),

    /// A declaration that the sender suspects the epoch's leaders.
    Suspect { epoch: u64 },

    /// A relayed client request ack, so non-leaders learn request payloads.
    Forward { epoch: u64, ack: RequestAck },

    /// The sender's evidence report for moving to a new epoch.
    EpochChange(EpochChange),

    /// The new epoch's starting state, announced by its primary.
    NewEpoch(Box<NewEpochConfig>),
}

impl Msg {
    /// The message kind name, for logging and telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Msg::Preprepare { .. } => "Preprepare",
            Msg::Prepare { .. } => "Prepare",
            Msg::Commit { .. } => "Commit",
            Msg::Checkpoint(_) => "Checkpoint",
            Msg::Suspect { .. } => "Suspect",
            Msg::Forward { .. } => "Forward",
            Msg::EpochChange(_) => "EpochChange",
            Msg::NewEpoch(_) => "NewEpoch",
        }
    }
}
