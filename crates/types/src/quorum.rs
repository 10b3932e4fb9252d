//! Quorum arithmetic and sequence-number maps.
//!
//! These are pure functions over the network and epoch configuration. Every
//! threshold comparison in the protocol goes through them, so that the
//! arithmetic is identical at every call site.

use crate::{BucketId, EpochConfig, NetworkConfig, SeqNo};

/// The number of nodes required to agree such that any two such sets
/// intersect in at least one correct node.
///
/// This is `ceil((n+f+1)/2)`, equivalently `(n+f+2)/2` under truncating
/// integer division. It is the prepare and commit threshold.
pub fn intersection_quorum(config: &NetworkConfig) -> usize {
    (config.n() + config.f as usize + 2) / 2
}

/// The number of nodes such that at least one of them is correct.
pub fn some_correct_quorum(config: &NetworkConfig) -> usize {
    config.f as usize + 1
}

/// The number of sequence numbers in the sliding window.
pub fn log_width(config: &NetworkConfig) -> u64 {
    3 * config.checkpoint_interval
}

/// The first sequence number governed by `epoch`.
pub fn initial_sequence(epoch: &EpochConfig, config: &NetworkConfig) -> SeqNo {
    if epoch.planned_expiration.0 > config.max_epoch_length {
        SeqNo(epoch.planned_expiration.0 - config.max_epoch_length + 1)
    } else {
        SeqNo(1)
    }
}

/// The sequence number of the checkpoint `epoch` starts from.
///
/// Message-admission cursors and the next-checkpoint cursor initialize from
/// this value at epoch boundaries.
pub fn low_watermark(epoch: &EpochConfig, config: &NetworkConfig) -> SeqNo {
    SeqNo(initial_sequence(epoch, config).0 - 1)
}

/// The bucket `seq_no` falls into within `epoch`.
pub fn seq_to_bucket(seq_no: SeqNo, epoch: &EpochConfig, config: &NetworkConfig) -> BucketId {
    BucketId((seq_no.0 - initial_sequence(epoch, config).0) % config.number_of_buckets)
}

/// The column `seq_no` falls into within `epoch`: the 1-based position of
/// its slot within its bucket.
pub fn seq_to_column(seq_no: SeqNo, epoch: &EpochConfig, config: &NetworkConfig) -> u64 {
    (seq_no.0 - initial_sequence(epoch, config).0) / config.number_of_buckets + 1
}
