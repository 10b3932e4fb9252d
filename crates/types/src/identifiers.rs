//! Identifier newtypes used throughout the protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a replica in the network.
///
/// Node ids are assigned by the network configuration; their ascending order
/// is the protocol's deterministic iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// A partition of the sequence space within an epoch.
///
/// Each bucket has a single leader per epoch, allowing leaders to propose
/// in parallel across buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketId(pub u64);

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bucket-{}", self.0)
    }
}

/// Monotonic 64-bit sequence number.
///
/// Sequence numbering starts at 1; 0 is reserved for the genesis
/// checkpoint / low watermark of the first epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct SeqNo(pub u64);

impl SeqNo {
    /// The sequence number immediately after this one.
    pub fn next(self) -> Self {
        SeqNo(self.0 + 1)
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
