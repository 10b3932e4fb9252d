//! The durability seam between the core and the write-ahead log.

use crate::{Actions, Persist};
use totem_types::{Checkpoint, PEntry, QEntry};
use tracing::trace;

/// Records protocol evidence durably.
///
/// The slot state machines hand their evidence to a `Persister` at the
/// moment the matching message becomes sendable; the returned actions are
/// folded into the same batch as the send, and the outer loop makes the
/// records durable before any of those sends leave the node.
pub trait Persister {
    /// Record preprepare evidence.
    fn add_q_entry(&mut self, q_entry: QEntry) -> Actions;

    /// Record prepare evidence.
    fn add_p_entry(&mut self, p_entry: PEntry) -> Actions;
}

/// A record in the write-ahead log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    QEntry(QEntry),
    PEntry(PEntry),
    Checkpoint(Checkpoint),
}

/// In-memory reference write-ahead log.
///
/// Appends records in insertion order and emits the matching persist
/// action for the outer loop. Replaying [`WriteAheadLog::records`] against
/// fresh slot state machines reproduces their exact states, which is also
/// what the crash-recovery tests do.
#[derive(Debug, Clone, Default)]
pub struct WriteAheadLog {
    records: Vec<LogRecord>,
}

impl WriteAheadLog {
    pub fn new() -> Self {
        WriteAheadLog::default()
    }

    /// Record a stable checkpoint.
    ///
    /// Checkpoints are appended by the outer loop once attested; they are
    /// not co-scheduled with sends, so nothing is returned.
    pub fn add_checkpoint(&mut self, checkpoint: Checkpoint) {
        trace!(seq_no = %checkpoint.seq_no, "logging checkpoint");
        self.records.push(LogRecord::Checkpoint(checkpoint));
    }

    /// All records, in insertion order.
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }
}

impl Persister for WriteAheadLog {
    fn add_q_entry(&mut self, q_entry: QEntry) -> Actions {
        trace!(seq_no = %q_entry.seq_no, digest = ?q_entry.digest, "logging q-entry");
        self.records.push(LogRecord::QEntry(q_entry.clone()));
        let mut actions = Actions::new();
        actions.persist(Persist::QEntry(q_entry));
        actions
    }

    fn add_p_entry(&mut self, p_entry: PEntry) -> Actions {
        trace!(seq_no = %p_entry.seq_no, digest = ?p_entry.digest, "logging p-entry");
        self.records.push(LogRecord::PEntry(p_entry.clone()));
        let mut actions = Actions::new();
        actions.persist(Persist::PEntry(p_entry));
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use totem_types::{Digest, SeqNo};

    fn q_entry(seq_no: u64) -> QEntry {
        QEntry {
            seq_no: SeqNo(seq_no),
            digest: Digest::from([seq_no as u8]),
            batch: Vec::new(),
        }
    }

    fn p_entry(seq_no: u64) -> PEntry {
        PEntry {
            seq_no: SeqNo(seq_no),
            digest: Digest::from([seq_no as u8]),
        }
    }

    #[test]
    fn every_record_emits_its_persist_action() {
        let mut log = WriteAheadLog::new();

        let actions = log.add_q_entry(q_entry(1));
        assert_eq!(actions.persists, vec![Persist::QEntry(q_entry(1))]);
        assert!(actions.sends.is_empty());

        let actions = log.add_p_entry(p_entry(1));
        assert_eq!(actions.persists, vec![Persist::PEntry(p_entry(1))]);
    }

    #[test]
    fn records_keep_insertion_order() {
        let mut log = WriteAheadLog::new();
        log.add_q_entry(q_entry(1));
        log.add_p_entry(p_entry(1));
        log.add_checkpoint(Checkpoint {
            seq_no: SeqNo(5),
            value: Digest::from([0xcc]),
        });
        log.add_q_entry(q_entry(2));

        assert_eq!(
            log.records(),
            &[
                LogRecord::QEntry(q_entry(1)),
                LogRecord::PEntry(p_entry(1)),
                LogRecord::Checkpoint(Checkpoint {
                    seq_no: SeqNo(5),
                    value: Digest::from([0xcc]),
                }),
                LogRecord::QEntry(q_entry(2)),
            ],
        );
    }
}
