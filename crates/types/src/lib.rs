//! Core types for the Totem ordering protocol.
//!
//! This crate provides the foundational types used throughout the protocol
//! implementation:
//!
//! - **Identifiers**: [`NodeId`], [`BucketId`], [`SeqNo`]
//! - **Opaque digests**: [`Digest`]
//! - **Configuration**: [`NetworkConfig`], [`EpochConfig`]
//! - **Quorum arithmetic**: pure threshold and sequence-map functions
//! - **Protocol records**: [`RequestAck`], [`QEntry`], [`PEntry`], [`Checkpoint`]
//! - **Epoch-change payloads**: [`EpochChange`], [`NewEpochConfig`]
//! - **Status readout**: [`NodeStatus`]
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.

mod config;
mod digest;
mod epoch_change;
mod identifiers;
mod quorum;
mod records;
mod status;

pub use config::{ConfigError, EpochConfig, NetworkConfig};
pub use digest::Digest;
pub use epoch_change::{EpochChange, NewEpochConfig, SetEntry};
pub use identifiers::{BucketId, NodeId, SeqNo};
pub use quorum::{
    initial_sequence, intersection_quorum, log_width, low_watermark, seq_to_bucket, seq_to_column,
    some_correct_quorum,
};
pub use records::{Checkpoint, PEntry, QEntry, RequestAck};
pub use status::{NodeBucketStatus, NodeStatus};
