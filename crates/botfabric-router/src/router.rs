//! The identity table and the forwarding decision.
//!
//! [`Router`] is deliberately I/O-free: connections are represented by a
//! [`ConnId`] plus an outbound line channel, so every routing property can
//! be exercised in tests without sockets. The socket wiring lives in
//! [`crate::serve`].

use botfabric_types::RoutingHeader;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Broker-assigned handle identifying one physical connection.
pub type ConnId = u64;

/// The routing core: one identity table and one writer handle per live
/// connection, both owned exclusively by the router task.
///
/// Identity entries are last-write-wins and are *not* evicted when a
/// connection goes away; a stale entry surfaces as a failed forward, which
/// is logged and dropped. A name therefore stays unroutable-to until its
/// owner sends again on a fresh connection.
#[derive(Default)]
pub struct Router {
    identities: HashMap<String, ConnId>,
    connections: HashMap<ConnId, mpsc::UnboundedSender<String>>,
}

impl Router {
    /// Create an empty router with no connections and no identities.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new live connection and its outbound line channel.
    pub fn attach(&mut self, conn: ConnId, outbound: mpsc::UnboundedSender<String>) {
        self.connections.insert(conn, outbound);
    }

    /// Forget a closed connection's writer handle. Identity entries pointing
    /// at it are left in place on purpose (see the type-level docs).
    pub fn detach(&mut self, conn: ConnId) {
        self.connections.remove(&conn);
    }

    /// Process one inbound line from `conn`:
    ///
    /// 1. a non-empty `sender` upserts the identity table;
    /// 2. no `target` means registration-only, nothing is forwarded;
    /// 3. a known `target` gets the *original line bytes*, unmodified;
    /// 4. an unknown or unreachable `target` is logged and dropped.
    ///
    /// Nothing here can fail the caller; every error becomes a log line and
    /// the loop stays responsive for the next message.
    pub fn handle_line(&mut self, conn: ConnId, line: &str) {
        let header: RoutingHeader = match serde_json::from_str(line) {
            Ok(header) => header,
            Err(e) => {
                warn!(conn, error = %e, "dropping malformed message");
                return;
            }
        };

        if let Some(sender) = header.sender() {
            let previous = self.identities.insert(sender.to_string(), conn);
            if previous != Some(conn) {
                debug!(conn, sender, "registered client");
            }
        }

        let Some(target) = header.target() else {
            // Registration-only envelope.
            return;
        };

        match self.identities.get(target) {
            Some(&dest) => match self.connections.get(&dest) {
                Some(outbound) => {
                    if outbound.send(line.to_string()).is_err() {
                        warn!(target, conn = dest, "forward failed, connection closed");
                        self.connections.remove(&dest);
                    } else {
                        debug!(target, conn = dest, "forwarded message");
                    }
                }
                None => {
                    warn!(target, conn = dest, "target connection is gone, dropping message");
                }
            },
            None => {
                warn!(target, "target is not connected, dropping message");
            }
        }
    }

    /// Connection currently registered under `name`, if any. Mainly for
    /// tests and introspection.
    pub fn lookup(&self, name: &str) -> Option<ConnId> {
        self.identities.get(name).copied()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
