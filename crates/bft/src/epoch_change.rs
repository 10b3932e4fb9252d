//! Epoch-change evidence: parsing, canonical hashing, and construction of
//! the next epoch's starting state.
//!
//! [`construct_new_epoch_config`] is a deterministic pure function over a
//! set of peer [`EpochChange`] reports. Every honest node runs it over the
//! same inputs and must produce the same output bit for bit, which is why
//! candidate scanning follows the configured node order rather than any map
//! order.

use std::collections::BTreeMap;

use totem_types::{
    intersection_quorum, some_correct_quorum, Checkpoint, Digest, EpochChange, EpochConfig,
    NetworkConfig, NewEpochConfig, NodeId, SeqNo, SetEntry,
};
use tracing::{debug, trace};

/// Errors detected when parsing a peer's epoch-change report.
///
/// A malformed report is Byzantine-reachable input: the caller drops the
/// report (treating the peer as silent) rather than aborting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EpochChangeError {
    /// A report must attest at least one checkpoint to anchor its watermark.
    #[error("epoch change for epoch {0} reports no checkpoints")]
    NoCheckpoints(u64),

    /// The PSet may hold at most one entry per sequence number.
    #[error("epoch change carries conflicting p-set entries for seq_no {0}")]
    DuplicatePSetEntry(SeqNo),

    /// The QSet may hold at most one digest per (sequence, epoch) pair.
    #[error("epoch change carries conflicting q-set entries for seq_no {seq_no} epoch {epoch}")]
    DuplicateQSetEntry { seq_no: SeqNo, epoch: u64 },
}

/// An [`EpochChange`] indexed for construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEpochChange {
    pub underlying: EpochChange,
    /// The lowest checkpoint the report attests; evidence below it was
    /// truncated from the reporter's log.
    pub low_watermark: SeqNo,
    /// Highest prepared digest per sequence.
    pub p_set: BTreeMap<SeqNo, SetEntry>,
    /// Every preprepared digest per sequence, by epoch.
    pub q_set: BTreeMap<SeqNo, BTreeMap<u64, Digest>>,
}

impl ParsedEpochChange {
    pub fn parse(underlying: EpochChange) -> Result<Self, EpochChangeError> {
        let low_watermark = underlying
            .checkpoints
            .iter()
            .map(|checkpoint| checkpoint.seq_no)
            .min()
            .ok_or(EpochChangeError::NoCheckpoints(underlying.new_epoch))?;

        let mut p_set = BTreeMap::new();
        for entry in &underlying.p_set {
            if p_set.insert(entry.seq_no, entry.clone()).is_some() {
                return Err(EpochChangeError::DuplicatePSetEntry(entry.seq_no));
            }
        }

        let mut q_set: BTreeMap<SeqNo, BTreeMap<u64, Digest>> = BTreeMap::new();
        for entry in &underlying.q_set {
            let by_epoch = q_set.entry(entry.seq_no).or_default();
            if by_epoch.insert(entry.epoch, entry.digest.clone()).is_some() {
                return Err(EpochChangeError::DuplicateQSetEntry {
                    seq_no: entry.seq_no,
                    epoch: entry.epoch,
                });
            }
        }

        Ok(ParsedEpochChange {
            underlying,
            low_watermark,
            p_set,
            q_set,
        })
    }
}

/// Derive the starting state of epoch `new_epoch` from a set of peer
/// reports.
///
/// Returns `None` when the reports are insufficient to pin down a starting
/// checkpoint and a digest-or-null decision for every slot in the carry-over
/// window; the caller retries once more reports arrive. Panics if the
/// reports prove a safety violation (two correct quorums attesting
/// different values for the same checkpoint): the protocol is compromised
/// and continuing risks divergence.
pub fn construct_new_epoch_config(
    config: &NetworkConfig,
    new_epoch: u64,
    new_leaders: &[NodeId],
    epoch_changes: &BTreeMap<NodeId, ParsedEpochChange>,
) -> Option<NewEpochConfig> {
    let starting_checkpoint = select_starting_checkpoint(config, epoch_changes)?;

    debug!(
        new_epoch,
        checkpoint = %starting_checkpoint.seq_no,
        reports = epoch_changes.len(),
        "constructing new epoch configuration"
    );

    // Each slot in the window above the checkpoint must either carry a
    // digest a quorum can stand behind (condition A) or be vouched empty by
    // a quorum (condition B).
    let window = 2 * config.checkpoint_interval as usize;
    let mut final_preprepares: Vec<Option<Digest>> = vec![None; window];
    let mut any_selected = false;

    for (offset, slot) in final_preprepares.iter_mut().enumerate() {
        let seq_no = SeqNo(starting_checkpoint.seq_no.0 + 1 + offset as u64);

        if let Some(digest) = select_slot_digest(config, epoch_changes, seq_no) {
            trace!(%seq_no, digest = ?digest, "slot carries a prepared digest");
            *slot = Some(digest);
            any_selected = true;
            continue;
        }

        // Condition B: enough reporters whose logs reach this slot have
        // nothing prepared there.
        let vouched_empty = epoch_changes
            .values()
            .filter(|report| {
                report.low_watermark < seq_no && !report.p_set.contains_key(&seq_no)
            })
            .count();
        if vouched_empty < intersection_quorum(config) {
            debug!(%seq_no, vouched_empty, "insufficient evidence for slot");
            return None;
        }
    }

    if !any_selected {
        final_preprepares.clear();
    }

    Some(NewEpochConfig {
        config: EpochConfig {
            number: new_epoch,
            leaders: new_leaders.to_vec(),
            planned_expiration: SeqNo(starting_checkpoint.seq_no.0 + config.max_epoch_length),
        },
        starting_checkpoint,
        final_preprepares,
    })
}

/// Pick the highest checkpoint that some correct node attests and that a
/// quorum of logs reaches back to.
fn select_starting_checkpoint(
    config: &NetworkConfig,
    epoch_changes: &BTreeMap<NodeId, ParsedEpochChange>,
) -> Option<Checkpoint> {
    // Group attested checkpoints by (seq_no, value). The BTreeMap keeps
    // candidate scanning in a deterministic order.
    let mut supporters: BTreeMap<(SeqNo, Digest), Vec<NodeId>> = BTreeMap::new();
    for (node_id, report) in epoch_changes {
        for checkpoint in &report.underlying.checkpoints {
            supporters
                .entry((checkpoint.seq_no, checkpoint.value.clone()))
                .or_default()
                .push(*node_id);
        }
    }

    let mut max_checkpoint: Option<(SeqNo, Digest)> = None;

    for ((seq_no, value), supporting) in &supporters {
        if supporting.len() < some_correct_quorum(config) {
            continue;
        }

        let nodes_with_lower_watermark = epoch_changes
            .values()
            .filter(|report| report.low_watermark <= *seq_no)
            .count();
        if nodes_with_lower_watermark < intersection_quorum(config) {
            continue;
        }

        match &max_checkpoint {
            Some((max_seq_no, max_value)) if *max_seq_no == *seq_no => {
                // Both candidates passed the some-correct threshold, so two
                // correct nodes attest different values for one sequence.
                panic!(
                    "safety violation: conflicting checkpoints for seq_no {}: {:?} != {:?}",
                    seq_no, max_value, value,
                );
            }
            Some((max_seq_no, _)) if *max_seq_no > *seq_no => {}
            _ => max_checkpoint = Some((*seq_no, value.clone())),
        }
    }

    max_checkpoint.map(|(seq_no, value)| Checkpoint { seq_no, value })
}

/// Condition A: find a prepared digest for `seq_no` that an intersection
/// quorum does not contradict (A1) and that some correct node preprepared
/// (A2).
///
/// Candidates are scanned in the order given by `config.nodes`, never in
/// map order; several candidates may qualify and every honest node must
/// settle on the same one.
fn select_slot_digest(
    config: &NetworkConfig,
    epoch_changes: &BTreeMap<NodeId, ParsedEpochChange>,
    seq_no: SeqNo,
) -> Option<Digest> {
    for node_id in &config.nodes {
        let Some(report) = epoch_changes.get(node_id) else {
            continue;
        };
        let Some(entry) = report.p_set.get(&seq_no) else {
            continue;
        };

        // A1: count the reports that cannot or do not contradict the
        // candidate. A report contradicts if its log reaches this slot and
        // holds an entry at a higher epoch, or one at the same epoch with a
        // different digest.
        let a1_count = epoch_changes
            .values()
            .filter(|other| {
                if other.low_watermark >= seq_no {
                    return true;
                }
                match other.p_set.get(&seq_no) {
                    None => true,
                    Some(other_entry) => {
                        other_entry.epoch < entry.epoch
                            || (other_entry.epoch == entry.epoch
                                && other_entry.digest == entry.digest)
                    }
                }
            })
            .count();
        if a1_count < intersection_quorum(config) {
            continue;
        }

        // A2: count the reports whose q-set holds this digest at the
        // candidate's epoch or later.
        let a2_count = epoch_changes
            .values()
            .filter(|other| {
                other.q_set.get(&seq_no).is_some_and(|by_epoch| {
                    by_epoch
                        .iter()
                        .any(|(epoch, digest)| *epoch >= entry.epoch && *digest == entry.digest)
                })
            })
            .count();
        if a2_count < some_correct_quorum(config) {
            continue;
        }

        return Some(entry.digest.clone());
    }

    None
}

/// Canonical byte layout of an epoch-change report, for signing and
/// signature verification.
///
/// Integers are fixed-width 8-byte big-endian. The layout is
/// `[new_epoch, (seq_no, value) per checkpoint, (epoch, seq_no, digest) per
/// p-set entry, the same per q-set entry]`, flattened in order.
pub fn epoch_change_hash_data(epoch_change: &EpochChange) -> Vec<Vec<u8>> {
    let expected_len = 1
        + 2 * epoch_change.checkpoints.len()
        + 3 * epoch_change.p_set.len()
        + 3 * epoch_change.q_set.len();
    let mut data = Vec::with_capacity(expected_len);

    data.push(epoch_change.new_epoch.to_be_bytes().to_vec());

    for checkpoint in &epoch_change.checkpoints {
        data.push(checkpoint.seq_no.0.to_be_bytes().to_vec());
        data.push(checkpoint.value.as_bytes().to_vec());
    }

    for entry in epoch_change.p_set.iter().chain(&epoch_change.q_set) {
        data.push(entry.epoch.to_be_bytes().to_vec());
        data.push(entry.seq_no.0.to_be_bytes().to_vec());
        data.push(entry.digest.as_bytes().to_vec());
    }

    assert_eq!(
        data.len(),
        expected_len,
        "epoch change hash layout mismatch",
    );

    data
}
