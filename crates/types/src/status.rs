//! Operational status readout.

use serde::{Deserialize, Serialize};

/// Snapshot of one peer's message-admission cursors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// The peer the snapshot describes.
    pub id: u64,
    /// One entry per bucket, in bucket order.
    pub bucket_statuses: Vec<NodeBucketStatus>,
}

/// Admission progress for a single bucket of a peer.
///
/// `last_*` values are the cursor minus one; sequences start at 1 so no
/// underflow occurs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeBucketStatus {
    pub bucket_id: u64,
    /// Whether the peer leads this bucket in the current epoch.
    pub is_leader: bool,
    pub last_prepare: u64,
    pub last_commit: u64,
    pub last_checkpoint: u64,
}
