//! `botfabric-types` – wire and bookkeeping types shared by every fabric
//! participant.
//!
//! The fabric exchanges UTF-8 JSON objects, one per line, over local Unix
//! sockets. This crate defines the shapes of those objects:
//!
//! - [`Envelope`] – the addressed message unit routed by name.
//! - [`Payload`] – tagged union of the known message kinds, with an opaque
//!   fallback so unknown kinds survive a round trip through a client.
//! - [`RoutingHeader`] – the minimal view the router parses (it never
//!   deserialises the full envelope; it forwards the original bytes).
//! - [`LogRecord`] / [`LogLevel`] – structured log and heartbeat records.
//! - [`ManifestEntry`] – one supervised child program.
//! - [`FabricError`] – the error type spanning transport, codec, manifest
//!   and spawn failures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Envelope
// ────────────────────────────────────────────────────────────────────────────

/// The atomic message unit exchanged through the data socket.
///
/// `sender` is the logical name of the origin and doubles as the
/// registration key: the router learns `name -> connection` from the sender
/// field of every message it sees. `target` names the destination; when it
/// is absent the envelope is registration-only and never forwarded.
///
/// `timestamp` is producer-assigned wall-clock time and is advisory only;
/// the router does not order by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Envelope {
    /// Build the registration-only envelope sent once on connect.
    ///
    /// It carries a sender and no target, so the router records the identity
    /// and forwards nothing.
    pub fn register(sender: impl Into<String>) -> Self {
        Self {
            sender: Some(sender.into()),
            target: None,
            timestamp: Some(Utc::now()),
            payload: Payload::Known(KnownPayload::Register),
        }
    }

    /// Build an addressed `data` envelope carrying a command and a free-form
    /// JSON body (`SET MODE`, `GET_STATE`, `SUBSCRIBE_STATE`, …).
    pub fn data(
        sender: impl Into<String>,
        target: impl Into<String>,
        command: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            sender: Some(sender.into()),
            target: Some(target.into()),
            timestamp: Some(Utc::now()),
            payload: Payload::Known(KnownPayload::Data {
                command: command.into(),
                data,
            }),
        }
    }

    /// Build an addressed `camera_event` envelope (per-mode detection event).
    pub fn camera_event(
        sender: impl Into<String>,
        target: impl Into<String>,
        mode: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            sender: Some(sender.into()),
            target: Some(target.into()),
            timestamp: Some(Utc::now()),
            payload: Payload::Known(KnownPayload::CameraEvent {
                mode: mode.into(),
                payload,
            }),
        }
    }

    /// `true` when the envelope has no (non-empty) target and therefore must
    /// not be forwarded.
    pub fn is_registration(&self) -> bool {
        !matches!(self.target.as_deref(), Some(t) if !t.is_empty())
    }
}

/// Message body, keyed by the wire-level `type` field.
///
/// Known kinds deserialise into their concrete variant; anything else is
/// preserved verbatim as [`Payload::Opaque`] so a client can re-emit an
/// envelope kind it does not understand without losing fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Known(KnownPayload),
    Opaque(Value),
}

/// The message kinds the fleet currently speaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KnownPayload {
    /// Registration-only bootstrap message; no body.
    Register,
    /// Application command traffic: `SET MODE <name>`, `SET ...`,
    /// `GET_STATE`, `SUBSCRIBE_STATE`.
    Data {
        command: String,
        #[serde(default)]
        data: Value,
    },
    /// Per-mode vision detection event (`APRILTAG`, `BALL`, `QRCODE`).
    CameraEvent { mode: String, payload: Value },
}

/// The minimal envelope view the router parses.
///
/// Every other field is ignored so the router stays payload-agnostic and can
/// forward the original line bytes unmodified.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingHeader {
    #[serde(default)]
    sender: Option<String>,
    #[serde(default)]
    target: Option<String>,
}

impl RoutingHeader {
    /// Sender name, treating an empty string the same as absent.
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref().filter(|s| !s.is_empty())
    }

    /// Target name, treating an empty string the same as absent.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref().filter(|t| !t.is_empty())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Log and heartbeat records
// ────────────────────────────────────────────────────────────────────────────

/// Severity of a [`LogRecord`]. Lowercase on the wire.
///
/// `Heartbeat` shares the record shape with ordinary logs but travels on the
/// dedicated heartbeat socket; it is the sole liveness signal the supervisor
/// trusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Heartbeat,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Heartbeat => "heartbeat",
        };
        write!(f, "{s}")
    }
}

/// One structured record on the log or heartbeat socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub sender: String,
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub message: String,
}

impl LogRecord {
    /// Build a log record stamped with the current time.
    pub fn new(sender: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            sender: sender.into(),
            level,
            message: message.into(),
        }
    }

    /// Build a heartbeat record (empty message, `level = heartbeat`).
    pub fn heartbeat(sender: impl Into<String>) -> Self {
        Self::new(sender, LogLevel::Heartbeat, "")
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Manifest
// ────────────────────────────────────────────────────────────────────────────

/// One entry of the supervisor's launch manifest: a JSON array of these,
/// read once at startup, spawned in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Logical name; must match the `sender` the child registers under.
    pub name: String,
    /// Executable path.
    pub path: String,
    /// Extra argv entries, defaulting to none.
    #[serde(default)]
    pub args: Vec<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Error type
// ────────────────────────────────────────────────────────────────────────────

/// Fabric-wide error type.
///
/// Every recoverable failure is contained at the loop where it occurs and
/// converted to a log line; these variants surface only at API boundaries
/// (connect, send, manifest load, spawn).
#[derive(Error, Debug)]
pub enum FabricError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("manifest entry '{name}': {reason}")]
    Manifest { name: String, reason: String },

    #[error("failed to spawn '{name}': {reason}")]
    Spawn { name: String, reason: String },
}
