//! Network and epoch configuration.

use crate::{BucketId, NodeId, SeqNo};
use serde::{Deserialize, Serialize};

/// Errors detected when validating a network configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Byzantine fault tolerance requires `n >= 3f + 1`.
    #[error("{nodes} nodes cannot tolerate {f} faults, at least 3f+1 are required")]
    InsufficientNodes { nodes: usize, f: u64 },

    /// Node ids must be strictly ascending; their order is the protocol's
    /// deterministic iteration order.
    #[error("node ids must be strictly ascending")]
    UnsortedNodes,

    /// At least one bucket is required to map sequences to leaders.
    #[error("number_of_buckets must be at least 1")]
    NoBuckets,

    /// The checkpoint interval drives watermark movement and cannot be zero.
    #[error("checkpoint_interval must be at least 1")]
    ZeroCheckpointInterval,
}

/// Immutable description of the network, fixed for the duration of an epoch.
///
/// Shared read-only across the protocol while an epoch is live; epoch changes
/// install a fresh reference rather than mutating in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Participating replicas, in strictly ascending id order.
    pub nodes: Vec<NodeId>,
    /// Number of Byzantine faults tolerated.
    pub f: u64,
    /// Distance between checkpoints in sequence numbers.
    pub checkpoint_interval: u64,
    /// Number of buckets the sequence space is partitioned into.
    pub number_of_buckets: u64,
    /// Maximum number of sequences an epoch may span.
    pub max_epoch_length: u64,
}

impl NetworkConfig {
    /// Build a validated configuration.
    pub fn new(
        nodes: Vec<NodeId>,
        f: u64,
        checkpoint_interval: u64,
        number_of_buckets: u64,
        max_epoch_length: u64,
    ) -> Result<Self, ConfigError> {
        let config = NetworkConfig {
            nodes,
            f,
            checkpoint_interval,
            number_of_buckets,
            max_epoch_length,
        };
        config.validate()?;
        Ok(config)
    }

    /// Number of replicas in the network.
    pub fn n(&self) -> usize {
        self.nodes.len()
    }

    /// Check the structural invariants of the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if (self.nodes.len() as u64) < 3 * self.f + 1 {
            return Err(ConfigError::InsufficientNodes {
                nodes: self.nodes.len(),
                f: self.f,
            });
        }
        if self.nodes.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ConfigError::UnsortedNodes);
        }
        if self.number_of_buckets == 0 {
            return Err(ConfigError::NoBuckets);
        }
        if self.checkpoint_interval == 0 {
            return Err(ConfigError::ZeroCheckpointInterval);
        }
        Ok(())
    }
}

/// Per-epoch leadership assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochConfig {
    /// The epoch number.
    pub number: u64,
    /// The epoch's leader set, a subset of the network's nodes.
    pub leaders: Vec<NodeId>,
    /// The last sequence number this epoch is planned to order.
    pub planned_expiration: SeqNo,
}

impl EpochConfig {
    /// The leader responsible for proposing in `bucket` this epoch.
    ///
    /// Buckets are assigned to leaders round-robin.
    pub fn leader_of(&self, bucket: BucketId) -> NodeId {
        self.leaders[(bucket.0 % self.leaders.len() as u64) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(ids: &[u64]) -> Vec<NodeId> {
        ids.iter().copied().map(NodeId).collect()
    }

    #[test]
    fn accepts_minimal_bft_network() {
        assert!(NetworkConfig::new(nodes(&[0, 1, 2, 3]), 1, 5, 1, 200).is_ok());
    }

    #[test]
    fn rejects_too_few_nodes() {
        assert_eq!(
            NetworkConfig::new(nodes(&[0, 1, 2]), 1, 5, 1, 200),
            Err(ConfigError::InsufficientNodes { nodes: 3, f: 1 }),
        );
    }

    #[test]
    fn rejects_unsorted_nodes() {
        assert_eq!(
            NetworkConfig::new(nodes(&[0, 2, 1, 3]), 1, 5, 1, 200),
            Err(ConfigError::UnsortedNodes),
        );
        assert_eq!(
            NetworkConfig::new(nodes(&[0, 1, 1, 3]), 1, 5, 1, 200),
            Err(ConfigError::UnsortedNodes),
        );
    }

    #[test]
    fn rejects_degenerate_intervals() {
        assert_eq!(
            NetworkConfig::new(nodes(&[0, 1, 2, 3]), 1, 5, 0, 200),
            Err(ConfigError::NoBuckets),
        );
        assert_eq!(
            NetworkConfig::new(nodes(&[0, 1, 2, 3]), 1, 0, 1, 200),
            Err(ConfigError::ZeroCheckpointInterval),
        );
    }

    #[test]
    fn buckets_map_to_leaders_round_robin() {
        let epoch = EpochConfig {
            number: 1,
            leaders: nodes(&[0, 1, 3]),
            planned_expiration: SeqNo(200),
        };
        assert_eq!(epoch.leader_of(BucketId(0)), NodeId(0));
        assert_eq!(epoch.leader_of(BucketId(1)), NodeId(1));
        assert_eq!(epoch.leader_of(BucketId(2)), NodeId(3));
        assert_eq!(epoch.leader_of(BucketId(3)), NodeId(0));
    }
}
