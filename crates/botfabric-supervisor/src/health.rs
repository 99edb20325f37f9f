//! [`HeartbeatLedger`] – last-seen bookkeeping behind the watchdog.
//!
//! The supervisor records a timestamp for every sender it hears on the
//! heartbeat socket, including senders that are not in the manifest (the
//! router heartbeats too). The watchdog then asks which senders have gone
//! quiet; it never removes anyone — a process that heartbeated once is
//! expected to keep doing so for the life of the fleet.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Maps each heartbeating sender to the instant it was last heard.
#[derive(Default)]
pub struct HeartbeatLedger {
    seen: HashMap<String, Instant>,
}

impl HeartbeatLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat from `sender` at the current instant.
    pub fn observe(&mut self, sender: &str) {
        self.seen.insert(sender.to_string(), Instant::now());
    }

    /// When `sender` was last heard, if ever.
    pub fn last_seen(&self, sender: &str) -> Option<Instant> {
        self.seen.get(sender).copied()
    }

    /// Senders whose last heartbeat is older than `threshold`, with the age
    /// of that heartbeat. Sorted by name so warning output is stable.
    pub fn stale(&self, threshold: Duration) -> Vec<(String, Duration)> {
        let mut out: Vec<(String, Duration)> = self
            .seen
            .iter()
            .filter_map(|(name, &at)| {
                let age = at.elapsed();
                (age > threshold).then(|| (name.clone(), age))
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// `true` when `sender` has heartbeated within `threshold`. Unknown
    /// senders are not fresh.
    pub fn is_fresh(&self, sender: &str, threshold: Duration) -> bool {
        self.seen
            .get(sender)
            .is_some_and(|at| at.elapsed() <= threshold)
    }
}
