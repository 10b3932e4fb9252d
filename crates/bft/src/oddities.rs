//! Recording of non-fatal protocol anomalies.

use totem_core::Msg;
use totem_types::NodeId;
use tracing::{debug, warn};

/// Counters of anomalous-but-survivable peer behavior.
///
/// None of these abort anything; they are logged and counted so the outer
/// layers can score or disconnect misbehaving peers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Oddities {
    already_processed: u64,
    invalid: u64,
    dropped_overflow: u64,
}

impl Oddities {
    pub fn new() -> Self {
        Oddities::default()
    }

    /// A message the protocol has already moved past: a duplicate or a
    /// retransmission from before the peer's cursor.
    pub fn already_processed(&mut self, peer: NodeId, msg: &Msg) {
        self.already_processed += 1;
        debug!(%peer, kind = msg.type_name(), "dropping already processed message");
    }

    /// A message that can never become current, such as a preprepare for a
    /// bucket the sender does not lead.
    pub fn invalid_message(&mut self, peer: NodeId, msg: &Msg) {
        self.invalid += 1;
        warn!(%peer, kind = msg.type_name(), "dropping invalid message");
    }

    /// A message dropped because the peer's buffer is full.
    pub fn dropped_overflow(&mut self, peer: NodeId, msg: &Msg) {
        self.dropped_overflow += 1;
        warn!(%peer, kind = msg.type_name(), "dropping message, buffer full");
    }

    pub fn already_processed_count(&self) -> u64 {
        self.already_processed
    }

    pub fn invalid_count(&self) -> u64 {
        self.invalid
    }

    pub fn dropped_overflow_count(&self) -> u64 {
        self.dropped_overflow
    }

    /// Total anomalies recorded, as a crude peer-behavior score.
    pub fn total(&self) -> u64 {
        self.already_processed + self.invalid + self.dropped_overflow
    }
}
