//! The per-slot three-phase state machine.
//!
//! One [`Sequence`] drives a single `(epoch, seq_no)` slot from allocation
//! through commit. It owns the prepare and commit tallies for its slot,
//! hands evidence to the write-ahead log as it advances, and emits the
//! matching sends in the same action batch, relying on the outer loop to
//! make the log records durable before the sends leave the node.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use totem_core::{Actions, HashOrigin, HashRequest, Msg, Persister};
use totem_types::{
    intersection_quorum, seq_to_bucket, Digest, EpochConfig, NetworkConfig, NodeId, PEntry, QEntry,
    RequestAck, SeqNo,
};
use tracing::{debug, trace, warn};

/// Cap on distinct digests tallied per slot.
///
/// A Byzantine peer can vote for arbitrarily many digests; beyond this many
/// distinct digests in one tally, further ones are dropped and logged.
const MAX_TRACKED_DIGESTS: usize = 8;

/// Lifecycle of a sequence slot. States only ever advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SequenceState {
    /// Created but not yet allocated a batch.
    Uninitialized,
    /// A batch has been assigned.
    Allocated,
    /// Waiting for forwarded request payloads named by the batch.
    PendingRequests,
    /// All requests present; waiting for the batch digest.
    Ready,
    /// Preprepare evidence logged, preprepare/prepare emitted.
    Preprepared,
    /// Prepare quorum observed, prepare evidence logged, commit emitted.
    Prepared,
    /// Commit quorum observed; the slot's batch is final.
    Committed,
}

/// State machine for one slot of the log.
pub struct Sequence {
    /// The leader of this slot's bucket, whose preprepare drives it.
    owner: NodeId,
    seq_no: SeqNo,
    epoch: u64,

    /// The local replica's id.
    my_id: NodeId,
    epoch_config: Arc<EpochConfig>,
    network_config: Arc<NetworkConfig>,

    state: SequenceState,

    /// Unset until state >= Preprepared.
    q_entry: Option<QEntry>,

    /// Unset until state >= Allocated.
    batch: Option<Vec<RequestAck>>,

    /// Request digests still missing locally; drained by `satisfy_outstanding`.
    outstanding_reqs: HashSet<Digest>,

    /// The computed digest of the batch; unset until the hash result arrives.
    digest: Option<Digest>,

    /// Prepare attestations, keyed by digest so conflicting digests from
    /// Byzantine peers tally separately.
    prepares: HashMap<Digest, HashSet<NodeId>>,
    /// Commit attestations, keyed like `prepares`.
    commits: HashMap<Digest, HashSet<NodeId>>,
}

impl Sequence {
    pub fn new(
        owner: NodeId,
        epoch: u64,
        seq_no: SeqNo,
        my_id: NodeId,
        epoch_config: Arc<EpochConfig>,
        network_config: Arc<NetworkConfig>,
    ) -> Self {
        Sequence {
            owner,
            seq_no,
            epoch,
            my_id,
            epoch_config,
            network_config,
            state: SequenceState::Uninitialized,
            q_entry: None,
            batch: None,
            outstanding_reqs: HashSet::new(),
            digest: None,
            prepares: HashMap::new(),
            commits: HashMap::new(),
        }
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub fn seq_no(&self) -> SeqNo {
        self.seq_no
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn owner(&self) -> NodeId {
        self.owner
    }

    /// The batch digest, once computed.
    pub fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    /// The logged preprepare evidence, once state >= Preprepared.
    pub fn q_entry(&self) -> Option<&QEntry> {
        self.q_entry.as_ref()
    }

    pub fn is_committed(&self) -> bool {
        self.state == SequenceState::Committed
    }

    /// Reserve this slot for a batch proposed by its owner, with no
    /// outstanding request payloads.
    pub fn allocate_as_owner(
        &mut self,
        persister: &mut dyn Persister,
        request_acks: Vec<RequestAck>,
    ) -> Actions {
        self.allocate(persister, request_acks, HashSet::new())
    }

    /// Reserve this slot for a set of requests.
    ///
    /// Permitted only in `Uninitialized`; allocating twice is a programmer
    /// error. An empty batch needs no hashing and goes straight to `Ready`
    /// with the empty digest; otherwise a hash request for the batch is
    /// emitted and the slot waits in `PendingRequests` until `outstanding`
    /// drains.
    pub fn allocate(
        &mut self,
        persister: &mut dyn Persister,
        request_acks: Vec<RequestAck>,
        outstanding: HashSet<Digest>,
    ) -> Actions {
        if self.state != SequenceState::Uninitialized {
            panic!(
                "allocate in illegal state {:?} (seq_no {}, epoch {})",
                self.state, self.seq_no, self.epoch,
            );
        }

        self.state = SequenceState::Allocated;

        if request_acks.is_empty() {
            // A no-op batch; there is no digest to compute.
            trace!(seq_no = %self.seq_no, epoch = self.epoch, "allocated no-op batch");
            self.batch = Some(request_acks);
            self.state = SequenceState::Ready;
            return self.apply_batch_hash_result(persister, Digest::empty());
        }

        debug!(
            seq_no = %self.seq_no,
            epoch = self.epoch,
            batch_size = request_acks.len(),
            outstanding = outstanding.len(),
            "allocated batch"
        );

        let data = request_acks
            .iter()
            .map(|ack| ack.digest.as_bytes().to_vec())
            .collect();
        let origin = HashOrigin::Batch {
            source: self.owner,
            seq_no: self.seq_no,
            epoch: self.epoch,
            batch: request_acks.clone(),
        };

        self.batch = Some(request_acks);
        self.outstanding_reqs = outstanding;
        self.state = SequenceState::PendingRequests;

        let mut actions = Actions::new();
        actions.hash(HashRequest { data, origin });
        actions.concat(self.advance_state(persister));
        actions
    }

    /// Mark one of the slot's outstanding requests as locally available.
    ///
    /// Calling this for a digest the slot is not waiting on is a programmer
    /// error: the outer loop routes forwards by the outstanding set.
    pub fn satisfy_outstanding(&mut self, persister: &mut dyn Persister, ack: &RequestAck) -> Actions {
        if !self.outstanding_reqs.remove(&ack.digest) {
            panic!(
                "satisfy_outstanding for digest {:?} the slot is not waiting on (seq_no {})",
                ack.digest, self.seq_no,
            );
        }

        self.advance_state(persister)
    }

    /// Record the digest computed for this slot's batch.
    ///
    /// Equivalent to receiving the owner's prepare: the owner's preprepare
    /// counts as its prepare, which is why the prepare threshold stays at
    /// the full intersection quorum.
    pub fn apply_batch_hash_result(&mut self, persister: &mut dyn Persister, digest: Digest) -> Actions {
        self.digest = Some(digest.clone());

        self.apply_prepare(persister, self.owner, digest)
    }

    /// Record a prepare attestation from `source`.
    pub fn apply_prepare(&mut self, persister: &mut dyn Persister, source: NodeId, digest: Digest) -> Actions {
        record_attestation(
            &mut self.prepares,
            self.digest.as_ref(),
            self.seq_no,
            source,
            digest,
            "prepare",
        );

        self.advance_state(persister)
    }

    /// Record a commit attestation from `source`.
    pub fn apply_commit(&mut self, persister: &mut dyn Persister, source: NodeId, digest: Digest) -> Actions {
        record_attestation(
            &mut self.commits,
            self.digest.as_ref(),
            self.seq_no,
            source,
            digest,
            "commit",
        );

        self.advance_state(persister)
    }

    /// Run the state machine to a fixpoint.
    fn advance_state(&mut self, persister: &mut dyn Persister) -> Actions {
        let mut actions = Actions::new();
        loop {
            let old_state = self.state;
            match self.state {
                SequenceState::Uninitialized => {}
                SequenceState::Allocated => {}
                SequenceState::PendingRequests => self.check_requests(),
                SequenceState::Ready => {
                    let batch_is_empty = self.batch.as_ref().is_some_and(Vec::is_empty);
                    if self.digest.is_some() || batch_is_empty {
                        actions.concat(self.prepare(persister));
                    }
                }
                SequenceState::Preprepared => {
                    actions.concat(self.check_prepare_quorum(persister));
                }
                SequenceState::Prepared => self.check_commit_quorum(),
                SequenceState::Committed => {}
            }
            if self.state == old_state {
                return actions;
            }
        }
    }

    fn check_requests(&mut self) {
        if !self.outstanding_reqs.is_empty() {
            return;
        }

        self.state = SequenceState::Ready;
    }

    /// Promote out of `Ready`: log the preprepare evidence and emit the
    /// owner's preprepare (plus request forwards) or our prepare.
    fn prepare(&mut self, persister: &mut dyn Persister) -> Actions {
        let batch = self
            .batch
            .clone()
            .expect("ready sequence must hold a batch");
        let digest = self
            .digest
            .clone()
            .expect("ready sequence must hold a digest");
        let bucket = seq_to_bucket(self.seq_no, &self.epoch_config, &self.network_config);

        let q_entry = QEntry {
            seq_no: self.seq_no,
            digest: digest.clone(),
            batch: batch.clone(),
        };
        self.q_entry = Some(q_entry.clone());
        self.state = SequenceState::Preprepared;

        let mut actions = Actions::new();
        if self.owner == self.my_id {
            debug!(seq_no = %self.seq_no, epoch = self.epoch, digest = ?digest, "prepreparing batch");
            for ack in &batch {
                actions.forward_request(&self.network_config.nodes, ack.clone());
            }
            actions.send(
                &self.network_config.nodes,
                Msg::Preprepare {
                    seq_no: self.seq_no,
                    epoch: self.epoch,
                    bucket,
                    batch,
                },
            );
        } else {
            debug!(seq_no = %self.seq_no, epoch = self.epoch, digest = ?digest, "preparing batch");
            actions.send(
                &self.network_config.nodes,
                Msg::Prepare {
                    seq_no: self.seq_no,
                    epoch: self.epoch,
                    bucket,
                    digest,
                },
            );
        }

        actions.concat(persister.add_q_entry(q_entry));
        actions
    }

    fn check_prepare_quorum(&mut self, persister: &mut dyn Persister) -> Actions {
        let digest = self
            .digest
            .as_ref()
            .expect("preprepared sequence must hold a digest");
        let Some(agreements) = self.prepares.get(digest) else {
            return Actions::new();
        };

        // Do not move to prepared unless our own prepare is among the
        // tally, as that is what guarantees our q-entry is logged.
        if !agreements.contains(&self.my_id) {
            return Actions::new();
        }

        // The full intersection quorum is required (not one less): the
        // owner's preprepare was tallied here as its prepare.
        if agreements.len() < intersection_quorum(&self.network_config) {
            return Actions::new();
        }

        debug!(
            seq_no = %self.seq_no,
            epoch = self.epoch,
            prepares = agreements.len(),
            "prepare quorum reached"
        );

        self.state = SequenceState::Prepared;

        let p_entry = PEntry {
            seq_no: self.seq_no,
            digest: digest.clone(),
        };
        let bucket = seq_to_bucket(self.seq_no, &self.epoch_config, &self.network_config);

        let mut actions = Actions::new();
        actions.send(
            &self.network_config.nodes,
            Msg::Commit {
                seq_no: self.seq_no,
                epoch: self.epoch,
                bucket,
                digest: digest.clone(),
            },
        );
        actions.concat(persister.add_p_entry(p_entry));
        actions
    }

    fn check_commit_quorum(&mut self) {
        let digest = self
            .digest
            .as_ref()
            .expect("prepared sequence must hold a digest");
        let Some(agreements) = self.commits.get(digest) else {
            return;
        };

        // Do not commit unless we have sent a commit, and therefore
        // already logged both our q-entry and p-entry.
        if !agreements.contains(&self.my_id) {
            return;
        }

        if agreements.len() < intersection_quorum(&self.network_config) {
            return;
        }

        debug!(
            seq_no = %self.seq_no,
            epoch = self.epoch,
            commits = agreements.len(),
            "commit quorum reached"
        );

        self.state = SequenceState::Committed;
    }
}

/// Tally an attestation under its digest, bounding the number of distinct
/// digests tracked.
fn record_attestation(
    tally: &mut HashMap<Digest, HashSet<NodeId>>,
    own_digest: Option<&Digest>,
    seq_no: SeqNo,
    source: NodeId,
    digest: Digest,
    kind: &'static str,
) {
    if own_digest.is_some_and(|own| *own != digest) {
        warn!(
            %seq_no,
            %source,
            expected = ?own_digest,
            received = ?digest,
            "{kind} for unexpected digest"
        );
    }

    if !tally.contains_key(&digest) && tally.len() >= MAX_TRACKED_DIGESTS {
        warn!(%seq_no, %source, digest = ?digest, "dropping {kind} beyond tracked digest cap");
        return;
    }

    tally.entry(digest).or_default().insert(source);
}

#[cfg(test)]
mod tests {
    use super::*;
    use totem_core::{Persist, WriteAheadLog};
    use tracing_test::traced_test;

    fn test_configs() -> (Arc<EpochConfig>, Arc<NetworkConfig>) {
        let network = NetworkConfig::new(
            (0..4).map(NodeId).collect(),
            1,
            5,
            1,
            200,
        )
        .unwrap();
        let epoch = EpochConfig {
            number: 0,
            leaders: vec![NodeId(0)],
            planned_expiration: SeqNo(200),
        };
        (Arc::new(epoch), Arc::new(network))
    }

    fn sequence_at(my_id: NodeId) -> Sequence {
        let (epoch_config, network_config) = test_configs();
        Sequence::new(
            NodeId(0),
            0,
            SeqNo(1),
            my_id,
            epoch_config,
            network_config,
        )
    }

    fn ack(byte: u8) -> RequestAck {
        RequestAck {
            client_id: 1,
            req_no: byte as u64,
            digest: Digest::from([byte]),
        }
    }

    fn has_send(actions: &Actions, name: &str) -> bool {
        actions.sends.iter().any(|send| send.msg.type_name() == name)
    }

    #[traced_test]
    #[test]
    fn owner_runs_the_full_three_phases() {
        let mut log = WriteAheadLog::new();
        let mut seq = sequence_at(NodeId(0));

        let actions = seq.allocate_as_owner(&mut log, vec![ack(0xaa)]);
        assert_eq!(seq.state(), SequenceState::Ready);
        assert_eq!(actions.hashes.len(), 1);
        assert_eq!(actions.hashes[0].data, vec![vec![0xaa]]);
        assert!(actions.sends.is_empty());

        // The digest arrives: preprepare plus forward go out, the q-entry
        // is logged in the same batch, and the owner's own prepare is
        // tallied.
        let actions = seq.apply_batch_hash_result(&mut log, Digest::from([0xbb]));
        assert_eq!(seq.state(), SequenceState::Preprepared);
        assert!(has_send(&actions, "Preprepare"));
        assert_eq!(actions.forwards.len(), 1);
        assert!(matches!(actions.persists[0], Persist::QEntry(_)));

        // Two more prepares reach the intersection quorum of three.
        let actions = seq.apply_prepare(&mut log, NodeId(1), Digest::from([0xbb]));
        assert_eq!(seq.state(), SequenceState::Preprepared);
        assert!(actions.is_empty());

        let actions = seq.apply_prepare(&mut log, NodeId(2), Digest::from([0xbb]));
        assert_eq!(seq.state(), SequenceState::Prepared);
        assert!(has_send(&actions, "Commit"));
        assert!(matches!(actions.persists[0], Persist::PEntry(_)));

        // Commits from ourselves and two peers commit the slot.
        seq.apply_commit(&mut log, NodeId(0), Digest::from([0xbb]));
        seq.apply_commit(&mut log, NodeId(1), Digest::from([0xbb]));
        assert_eq!(seq.state(), SequenceState::Prepared);
        seq.apply_commit(&mut log, NodeId(2), Digest::from([0xbb]));
        assert!(seq.is_committed());
    }

    #[traced_test]
    #[test]
    fn non_owner_emits_prepare_and_waits_for_own_loopback() {
        let mut log = WriteAheadLog::new();
        let mut seq = sequence_at(NodeId(1));

        seq.allocate(&mut log, vec![ack(0xaa)], HashSet::new());
        let actions = seq.apply_batch_hash_result(&mut log, Digest::from([0xbb]));
        assert!(has_send(&actions, "Prepare"));
        assert!(actions.forwards.is_empty());

        // The hash result tallied the owner's implicit prepare. A second
        // peer's prepare makes two, but without our own loopback the slot
        // must hold even though a third arrives.
        seq.apply_prepare(&mut log, NodeId(2), Digest::from([0xbb]));
        seq.apply_prepare(&mut log, NodeId(3), Digest::from([0xbb]));
        assert_eq!(seq.state(), SequenceState::Preprepared);

        let actions = seq.apply_prepare(&mut log, NodeId(1), Digest::from([0xbb]));
        assert_eq!(seq.state(), SequenceState::Prepared);
        assert!(has_send(&actions, "Commit"));
    }

    #[traced_test]
    #[test]
    fn no_op_batch_skips_the_hash_round_trip() {
        let mut log = WriteAheadLog::new();
        let mut seq = sequence_at(NodeId(1));

        let actions = seq.allocate(&mut log, Vec::new(), HashSet::new());
        assert_eq!(seq.state(), SequenceState::Preprepared);
        assert_eq!(seq.digest(), Some(&Digest::empty()));
        assert!(actions.hashes.is_empty());
        assert!(has_send(&actions, "Prepare"));

        let Persist::QEntry(q_entry) = &actions.persists[0] else {
            panic!("expected a q-entry persist, got {:?}", actions.persists);
        };
        assert!(q_entry.batch.is_empty());
        assert!(q_entry.digest.is_empty());
    }

    #[traced_test]
    #[test]
    fn outstanding_requests_gate_readiness() {
        let mut log = WriteAheadLog::new();
        let mut seq = sequence_at(NodeId(1));

        let outstanding: HashSet<Digest> =
            [Digest::from([0xaa]), Digest::from([0xab])].into_iter().collect();
        seq.allocate(&mut log, vec![ack(0xaa), ack(0xab)], outstanding);
        assert_eq!(seq.state(), SequenceState::PendingRequests);

        // The digest may arrive before the requests do; the slot holds.
        seq.apply_batch_hash_result(&mut log, Digest::from([0xbb]));
        assert_eq!(seq.state(), SequenceState::PendingRequests);

        seq.satisfy_outstanding(&mut log, &ack(0xaa));
        assert_eq!(seq.state(), SequenceState::PendingRequests);

        let actions = seq.satisfy_outstanding(&mut log, &ack(0xab));
        assert_eq!(seq.state(), SequenceState::Preprepared);
        assert!(has_send(&actions, "Prepare"));
    }

    #[traced_test]
    #[test]
    fn conflicting_digests_tally_separately() {
        let mut log = WriteAheadLog::new();
        let mut seq = sequence_at(NodeId(0));

        seq.allocate_as_owner(&mut log, vec![ack(0xaa)]);
        seq.apply_batch_hash_result(&mut log, Digest::from([0xbb]));

        // Two Byzantine prepares for a different digest must not count
        // toward our digest's quorum.
        seq.apply_prepare(&mut log, NodeId(1), Digest::from([0xee]));
        seq.apply_prepare(&mut log, NodeId(2), Digest::from([0xee]));
        assert_eq!(seq.state(), SequenceState::Preprepared);

        seq.apply_prepare(&mut log, NodeId(1), Digest::from([0xbb]));
        seq.apply_prepare(&mut log, NodeId(2), Digest::from([0xbb]));
        assert_eq!(seq.state(), SequenceState::Prepared);
    }

    #[traced_test]
    #[test]
    fn tracked_digest_cap_bounds_the_tally() {
        let mut log = WriteAheadLog::new();
        let mut seq = sequence_at(NodeId(0));

        seq.allocate_as_owner(&mut log, vec![ack(0xaa)]);
        seq.apply_batch_hash_result(&mut log, Digest::from([0xbb]));

        for i in 0..16u8 {
            seq.apply_prepare(&mut log, NodeId(1), Digest::from([0xc0, i]));
        }
        assert!(seq.prepares.len() <= MAX_TRACKED_DIGESTS);
        // Our own digest was tallied first and is always retained.
        assert!(seq.prepares.contains_key(&Digest::from([0xbb])));
    }

    #[traced_test]
    #[test]
    fn state_never_rewinds_after_commit() {
        let mut log = WriteAheadLog::new();
        let mut seq = sequence_at(NodeId(0));

        seq.allocate_as_owner(&mut log, vec![ack(0xaa)]);
        seq.apply_batch_hash_result(&mut log, Digest::from([0xbb]));
        for node in [1, 2] {
            seq.apply_prepare(&mut log, NodeId(node), Digest::from([0xbb]));
        }
        for node in [0, 1, 2] {
            seq.apply_commit(&mut log, NodeId(node), Digest::from([0xbb]));
        }
        assert!(seq.is_committed());

        // Late traffic is absorbed without regressing or emitting.
        let actions = seq.apply_prepare(&mut log, NodeId(3), Digest::from([0xbb]));
        assert!(actions.is_empty());
        let actions = seq.apply_commit(&mut log, NodeId(3), Digest::from([0xbb]));
        assert!(actions.is_empty());
        assert!(seq.is_committed());
    }

    #[test]
    #[should_panic(expected = "allocate in illegal state")]
    fn double_allocate_is_a_programmer_error() {
        let mut log = WriteAheadLog::new();
        let mut seq = sequence_at(NodeId(0));
        seq.allocate_as_owner(&mut log, vec![ack(0xaa)]);
        seq.allocate_as_owner(&mut log, vec![ack(0xab)]);
    }

    #[test]
    #[should_panic(expected = "satisfy_outstanding for digest")]
    fn satisfying_an_unknown_request_is_a_programmer_error() {
        let mut log = WriteAheadLog::new();
        let mut seq = sequence_at(NodeId(1));
        seq.allocate(
            &mut log,
            vec![ack(0xaa)],
            [Digest::from([0xaa])].into_iter().collect(),
        );
        seq.satisfy_outstanding(&mut log, &ack(0xab));
    }
}
