//! Protocol evidence records.

use crate::{Digest, SeqNo};

/// Acknowledgement of a client request.
///
/// Opaque to the ordering core: only `digest` participates in batch hashing,
/// the remaining fields exist for the client-facing layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAck {
    /// The submitting client.
    pub client_id: u64,
    /// The client's request counter.
    pub req_no: u64,
    /// Digest of the request payload.
    pub digest: Digest,
}

/// Preprepare evidence: the batch a slot was allocated with.
///
/// Persisted before the matching preprepare or prepare is transmitted. At
/// most one per `(epoch, seq_no)` at an honest node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QEntry {
    pub seq_no: SeqNo,
    pub digest: Digest,
    pub batch: Vec<RequestAck>,
}

/// Prepare evidence: the digest a slot prepared.
///
/// Persisted before the matching commit is transmitted. At most one per
/// `(epoch, seq_no)` at an honest node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PEntry {
    pub seq_no: SeqNo,
    pub digest: Digest,
}

/// A checkpoint attestation: a log-truncation point and the value agreed at
/// it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub seq_no: SeqNo,
    pub value: Digest,
}
