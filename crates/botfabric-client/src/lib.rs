//! `botfabric-client` – the binding every fleet process uses to join the
//! fabric.
//!
//! A process gets exactly four capabilities from this crate, and nothing
//! else needs to know where anyone lives on disk:
//!
//! 1. **register** under a logical name so the router can forward to it;
//! 2. **log** fire-and-forget structured records towards the supervisor;
//! 3. **heartbeat** periodically so the supervisor can track liveness;
//! 4. **send/receive** addressed envelopes through the router.
//!
//! See [`ClientBinding`][binding::ClientBinding] for the contract details
//! (register-before-send is mandatory, logging never fails the caller, every
//! background loop observes [`stop`][binding::ClientBinding::stop]).

pub mod binding;

pub use binding::{ClientBinding, MessageHandler};
