//! Contract layer for the Totem ordering protocol.
//!
//! This crate defines the boundary between the ordering core and its outer
//! loop:
//!
//! - [`Msg`]: all inbound and outbound wire messages
//! - [`Actions`]: all possible outputs of the core
//! - [`Persister`]: the write-ahead-log seam, with [`WriteAheadLog`] as the
//!   in-memory reference implementation
//!
//! # Architecture
//!
//! The core is built on a simple synchronous model:
//!
//! ```text
//! Msgs → core operations → Actions
//! ```
//!
//! Every core operation is:
//! - **Synchronous**: no async, no suspension points
//! - **Deterministic**: same state + input = same actions
//! - **Pure-ish**: mutates its own state, but performs no I/O
//!
//! All I/O is handled by the outer loop, which:
//! 1. Feeds inbound messages and hash results to the core
//! 2. Executes the returned actions
//! 3. Makes persist records durable before transmitting co-scheduled sends

mod actions;
mod message;
mod persister;

pub use actions::{Actions, ForwardRequest, HashOrigin, HashRequest, Persist, Send};
pub use message::Msg;
pub use persister::{LogRecord, Persister, WriteAheadLog};
