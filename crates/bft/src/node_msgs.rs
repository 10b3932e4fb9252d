//! Per-peer message admission.
//!
//! Links deliver out of order and duplicated, while the slot state machines
//! require each peer's messages in protocol order. A [`NodeMsgs`] buffers one
//! peer's inbound messages, classifies each as past, current, future, or
//! invalid, and releases only the current ones: right epoch, right bucket,
//! next expected sequence.

use std::collections::HashMap;
use std::sync::Arc;

use totem_core::Msg;
use totem_types::{
    log_width, low_watermark, BucketId, Checkpoint, EpochConfig, NetworkConfig, NodeBucketStatus,
    NodeId, NodeStatus, SeqNo,
};
use tracing::debug;

use crate::oddities::Oddities;

/// Classification of a buffered message against the peer's cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applyable {
    /// Already moved past; a duplicate or stale retransmission.
    Past,
    /// Exactly what the protocol expects next; release it.
    Current,
    /// Not yet applicable; keep it buffered.
    Future,
    /// Can never become applicable.
    Invalid,
}

/// Expected-next cursors for one bucket of one peer.
#[derive(Debug)]
struct NextMsg {
    /// Whether the peer leads this bucket; leaders send preprepares where
    /// followers send prepares, tracked by the same cursor.
    leader: bool,
    prepare: SeqNo,
    commit: SeqNo,
}

/// Cursors for the peer within the current epoch.
#[derive(Debug)]
struct EpochMsgs {
    epoch_config: Arc<EpochConfig>,
    network_config: Arc<NetworkConfig>,
    next: HashMap<BucketId, NextMsg>,
}

/// Buffer and admission cursors for messages from a single peer.
pub struct NodeMsgs {
    id: NodeId,
    oddities: Oddities,
    buffer: Vec<Msg>,
    /// Ingest beyond this many buffered messages drops the message; a peer
    /// further ahead than the sliding window has nothing releasable to say.
    buffer_cap: usize,
    epoch_msgs: EpochMsgs,
    next_checkpoint: SeqNo,
}

impl NodeMsgs {
    /// Create the admitter for peer `id`.
    pub fn new(
        id: NodeId,
        epoch_config: Arc<EpochConfig>,
        network_config: Arc<NetworkConfig>,
    ) -> Self {
        let watermark = low_watermark(&epoch_config, &network_config);
        let buffer_cap = (log_width(&network_config) * network_config.number_of_buckets) as usize;
        let next_checkpoint = SeqNo(watermark.0 + network_config.checkpoint_interval);
        NodeMsgs {
            id,
            oddities: Oddities::new(),
            buffer: Vec::new(),
            buffer_cap,
            epoch_msgs: EpochMsgs::new(id, epoch_config, network_config),
            next_checkpoint,
        }
    }

    /// Install a new epoch: cursors restart from the new epoch's low
    /// watermark. Buffered future messages survive the transition.
    pub fn new_epoch(&mut self, epoch_config: Arc<EpochConfig>) {
        let network_config = Arc::clone(&self.epoch_msgs.network_config);
        let watermark = low_watermark(&epoch_config, &network_config);
        self.next_checkpoint = SeqNo(watermark.0 + network_config.checkpoint_interval);
        self.epoch_msgs = EpochMsgs::new(self.id, epoch_config, network_config);
    }

    /// Accept a message for admission. It may become releasable immediately
    /// or only after earlier messages are released.
    pub fn ingest(&mut self, msg: Msg) {
        if self.buffer.len() >= self.buffer_cap {
            self.oddities.dropped_overflow(self.id, &msg);
            return;
        }
        self.buffer.push(msg);
    }

    /// Release the next current message, if any.
    ///
    /// Past messages encountered during the scan are dropped and counted;
    /// future ones stay buffered. No FIFO guarantee holds across message
    /// kinds, only per-kind per-sequence monotonicity.
    pub fn next(&mut self) -> Option<Msg> {
        let buffered = std::mem::take(&mut self.buffer);
        let mut released = None;

        for msg in buffered {
            if released.is_some() {
                self.buffer.push(msg);
                continue;
            }
            match self.process(&msg) {
                Applyable::Past => self.oddities.already_processed(self.id, &msg),
                Applyable::Current => released = Some(msg),
                Applyable::Future => {
                    debug!(peer = %self.id, kind = msg.type_name(), "deferring message from the future");
                    self.buffer.push(msg);
                }
                Applyable::Invalid => self.oddities.invalid_message(self.id, &msg),
            }
        }

        released
    }

    /// The anomaly counters accumulated for this peer.
    pub fn oddities(&self) -> &Oddities {
        &self.oddities
    }

    fn process(&mut self, msg: &Msg) -> Applyable {
        let epoch = match msg {
            Msg::Preprepare { epoch, .. }
            | Msg::Prepare { epoch, .. }
            | Msg::Commit { epoch, .. }
            | Msg::Suspect { epoch }
            | Msg::Forward { epoch, .. } => *epoch,
            Msg::EpochChange(epoch_change) => epoch_change.new_epoch,
            Msg::Checkpoint(checkpoint) => return self.process_checkpoint(checkpoint),
            // How NewEpoch relates to the installation protocol is still
            // undecided; admit it so the epoch logic can inspect it.
            Msg::NewEpoch(_) => return Applyable::Current,
        };

        let current_epoch = self.epoch_msgs.epoch_config.number;
        if epoch < current_epoch {
            return Applyable::Past;
        }
        if epoch > current_epoch {
            return Applyable::Future;
        }

        self.epoch_msgs.process(msg)
    }

    fn process_checkpoint(&mut self, checkpoint: &Checkpoint) -> Applyable {
        if checkpoint.seq_no < self.next_checkpoint {
            return Applyable::Past;
        }
        if checkpoint.seq_no > self.next_checkpoint {
            return Applyable::Future;
        }

        // The peer's checkpoint only becomes current once every bucket's
        // commits have advanced past it.
        for next in self.epoch_msgs.next.values() {
            if next.commit <= checkpoint.seq_no {
                return Applyable::Future;
            }
        }

        self.next_checkpoint =
            SeqNo(checkpoint.seq_no.0 + self.epoch_msgs.network_config.checkpoint_interval);
        Applyable::Current
    }

    /// Cursor snapshot for operational observability.
    pub fn status(&self) -> NodeStatus {
        let network_config = &self.epoch_msgs.network_config;
        let bucket_statuses = (0..network_config.number_of_buckets)
            .map(|bucket| {
                let next = &self.epoch_msgs.next[&BucketId(bucket)];
                NodeBucketStatus {
                    bucket_id: bucket,
                    is_leader: next.leader,
                    last_prepare: next.prepare.0 - 1,
                    last_commit: next.commit.0 - 1,
                    last_checkpoint: self.next_checkpoint.0 - network_config.checkpoint_interval,
                }
            })
            .collect();

        NodeStatus {
            id: self.id.0,
            bucket_statuses,
        }
    }
}

impl EpochMsgs {
    fn new(peer: NodeId, epoch_config: Arc<EpochConfig>, network_config: Arc<NetworkConfig>) -> Self {
        let watermark = low_watermark(&epoch_config, &network_config);
        let next = (0..network_config.number_of_buckets)
            .map(|bucket| {
                let bucket = BucketId(bucket);
                (
                    bucket,
                    NextMsg {
                        leader: epoch_config.leader_of(bucket) == peer,
                        prepare: SeqNo(watermark.0 + 1),
                        commit: SeqNo(watermark.0 + 1),
                    },
                )
            })
            .collect();

        EpochMsgs {
            epoch_config,
            network_config,
            next,
        }
    }

    fn process(&mut self, msg: &Msg) -> Applyable {
        match msg {
            Msg::Preprepare { seq_no, bucket, .. } => self.process_preprepare(*seq_no, *bucket),
            Msg::Prepare { seq_no, bucket, .. } => self.process_prepare(*seq_no, *bucket),
            Msg::Commit { seq_no, bucket, .. } => self.process_commit(*seq_no, *bucket),
            Msg::Forward { .. } | Msg::Suspect { .. } | Msg::EpochChange(_) => Applyable::Current,
            Msg::Checkpoint(_) | Msg::NewEpoch(_) => {
                unreachable!("classified before bucket dispatch")
            }
        }
    }

    fn process_preprepare(&mut self, seq_no: SeqNo, bucket: BucketId) -> Applyable {
        let Some(next) = self.next.get_mut(&bucket) else {
            return Applyable::Invalid;
        };
        if !next.leader {
            return Applyable::Invalid;
        }

        if next.prepare > seq_no {
            Applyable::Past
        } else if next.prepare == seq_no {
            next.prepare = seq_no.next();
            Applyable::Current
        } else {
            Applyable::Future
        }
    }

    fn process_prepare(&mut self, seq_no: SeqNo, bucket: BucketId) -> Applyable {
        let Some(next) = self.next.get_mut(&bucket) else {
            return Applyable::Invalid;
        };
        if next.leader {
            return Applyable::Invalid;
        }

        if next.prepare > seq_no {
            Applyable::Past
        } else if next.prepare == seq_no {
            next.prepare = seq_no.next();
            Applyable::Current
        } else {
            Applyable::Future
        }
    }

    fn process_commit(&mut self, seq_no: SeqNo, bucket: BucketId) -> Applyable {
        let Some(next) = self.next.get_mut(&bucket) else {
            return Applyable::Invalid;
        };

        if next.commit > seq_no {
            Applyable::Past
        } else if next.commit == seq_no && next.prepare > next.commit {
            // The matching prepare (or preprepare) was already released.
            next.commit = seq_no.next();
            Applyable::Current
        } else {
            Applyable::Future
        }
    }
}
