//! `botfabric-supervisor` – launches the fleet and watches it breathe.
//!
//! The supervisor reads an ordered manifest of child programs, spawns each
//! as an independent OS process, and then monitors the fleet passively: it
//! binds the log and heartbeat sockets, relays every log record into one
//! unified operator stream, and warns when a process goes quiet. It never
//! restarts or kills an unhealthy process on its own; operators act on the
//! log stream.
//!
//! # Modules
//!
//! - [`manifest`] – loading and validating the launch manifest.
//! - [`process`] – [`ProcessRecord`][process::ProcessRecord]: spawn,
//!   non-blocking exit poll, graceful terminate.
//! - [`health`] – [`HeartbeatLedger`][health::HeartbeatLedger]: last-seen
//!   bookkeeping behind the watchdog.
//! - [`relay`] – the `[timestamp] - [sender] : message` formatting of the
//!   unified log stream.
//! - [`supervisor`] – [`Supervisor`][supervisor::Supervisor]: the loop that
//!   ties all of the above together.

pub mod health;
pub mod manifest;
pub mod process;
pub mod relay;
pub mod supervisor;

pub use health::HeartbeatLedger;
pub use manifest::load_manifest;
pub use process::{ProcessRecord, ProcessState};
pub use supervisor::{Supervisor, SupervisorConfig};
