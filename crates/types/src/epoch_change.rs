//! Epoch-change payloads.

use crate::{Checkpoint, Digest, EpochConfig, SeqNo};

/// One PSet or QSet entry: the digest a node holds for `seq_no`, tagged with
/// the epoch it was prepared (or preprepared) in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetEntry {
    pub epoch: u64,
    pub seq_no: SeqNo,
    pub digest: Digest,
}

/// A node's report when it gives up on the current epoch.
///
/// Carries the checkpoints the node can attest to and its prepare/preprepare
/// evidence above the lowest of them. The PSet records the highest prepared
/// digest per sequence; the QSet records every preprepared digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochChange {
    /// The epoch this report proposes to move to.
    pub new_epoch: u64,
    pub checkpoints: Vec<Checkpoint>,
    pub p_set: Vec<SetEntry>,
    pub q_set: Vec<SetEntry>,
}

/// The starting state of a new epoch, as derived from a quorum of
/// [`EpochChange`] reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEpochConfig {
    pub config: EpochConfig,
    /// The checkpoint the new epoch resumes from.
    pub starting_checkpoint: Checkpoint,
    /// Digests that must be re-preprepared in the new epoch, indexed by
    /// offset from the starting checkpoint; `None` slots start fresh.
    /// Empty when no slot carried a digest forward.
    pub final_preprepares: Vec<Option<Digest>>,
}
