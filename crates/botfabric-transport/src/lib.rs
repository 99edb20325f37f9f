//! `botfabric-transport` – the shared wire layer.
//!
//! Every fabric endpoint is a local Unix stream socket carrying UTF-8 JSON,
//! one object per line. The newline is the only framing; per-sender ordering
//! falls out of each participant holding a single long-lived stream per
//! endpoint.
//!
//! # Modules
//!
//! - [`paths`] – [`FabricPaths`][paths::FabricPaths]: the three named socket
//!   endpoints (data, logs, heartbeats) with `Default` values and an
//!   environment override.
//! - [`framing`] – newline-delimited JSON read/write helpers plus
//!   bind/connect wrappers that map I/O failures into
//!   [`FabricError`][botfabric_types::FabricError].

pub mod framing;
pub mod paths;

pub use framing::{JsonLineReader, bind_endpoint, connect_endpoint, write_json, write_line};
pub use paths::FabricPaths;
