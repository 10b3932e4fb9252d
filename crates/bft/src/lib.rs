//! The Totem ordering core.
//!
//! This crate implements the protocol-critical pieces of a Mir-style
//! Byzantine-fault-tolerant ordering protocol as synchronous, deterministic
//! state machines:
//!
//! - [`Sequence`]: drives one `(epoch, seq_no)` slot through the
//!   preprepare → prepare → commit phases
//! - [`NodeMsgs`]: admits one peer's messages in protocol order
//! - [`construct_new_epoch_config`]: derives a new epoch's starting state
//!   from a quorum of [`EpochChange`](totem_types::EpochChange) reports
//! - [`epoch_change_hash_data`]: canonical byte layout of a report for
//!   signing
//!
//! # State Machine Flow
//!
//! 1. **Inbound message** → per-peer [`NodeMsgs`] buffers it
//! 2. **Release** → the outer loop drains current messages and applies them
//!    to the owning [`Sequence`]
//! 3. **Advance** → the sequence tallies attestations, logs evidence through
//!    the [`Persister`](totem_core::Persister), and emits sends
//! 4. **Epoch change** → collected reports feed
//!    [`construct_new_epoch_config`], whose output seeds fresh sequences
//!
//! Everything here is single-threaded and I/O-free; each operation returns
//! an [`Actions`](totem_core::Actions) batch for the outer loop to execute.

mod epoch_change;
mod node_msgs;
mod oddities;
mod sequence;

pub use epoch_change::{
    construct_new_epoch_config, epoch_change_hash_data, EpochChangeError, ParsedEpochChange,
};
pub use node_msgs::NodeMsgs;
pub use oddities::Oddities;
pub use sequence::{Sequence, SequenceState};
