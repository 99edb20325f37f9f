//! `botfabric-router` – the message broker at the centre of the fabric.
//!
//! Processes register under a logical name and exchange addressed JSON
//! envelopes without knowing each other's socket. The router learns
//! `name -> connection` purely from traffic: every inbound message with a
//! non-empty `sender` upserts the identity table, last write wins. Delivery
//! is at-most-once and best-effort; an envelope for an unknown target is
//! logged and dropped, never buffered.
//!
//! # Modules
//!
//! - [`router`] – [`Router`][router::Router]: the identity table and the
//!   forwarding decision, free of any socket I/O so it can be tested with
//!   plain channels.
//! - [`serve`] – [`serve`][serve::serve]: the accept loop that wires Unix
//!   socket connections into a single router task.

pub mod router;
pub mod serve;

pub use router::{ConnId, Router};
pub use serve::serve;
