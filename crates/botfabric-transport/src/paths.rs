//! Socket endpoint configuration.
//!
//! Three independent named endpoints exist in the full system: the router's
//! addressed data socket, and the supervisor's broadcast-only log and
//! heartbeat sockets.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory used when `BOTFABRIC_SOCKET_DIR` is not set.
const DEFAULT_SOCKET_DIR: &str = "/tmp";

/// Locations of the three fabric sockets.
///
/// All participants on one machine must agree on these; the usual way is to
/// let every process call [`FabricPaths::from_env`] so a single
/// `BOTFABRIC_SOCKET_DIR` override moves the whole fabric (useful for tests
/// and for running two fabrics side by side).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricPaths {
    /// Router-bound addressed request/reply socket.
    pub data: PathBuf,
    /// Supervisor-bound structured-log publish socket.
    pub logs: PathBuf,
    /// Supervisor-bound heartbeat publish socket.
    pub heartbeat: PathBuf,
}

impl FabricPaths {
    /// Place all three sockets under `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            data: dir.join("botfabric-data.sock"),
            logs: dir.join("botfabric-logs.sock"),
            heartbeat: dir.join("botfabric-heartbeat.sock"),
        }
    }

    /// Build the paths from `BOTFABRIC_SOCKET_DIR`, falling back to the
    /// default directory when unset.
    pub fn from_env() -> Self {
        match std::env::var("BOTFABRIC_SOCKET_DIR") {
            Ok(dir) if !dir.is_empty() => Self::in_dir(dir),
            _ => Self::default(),
        }
    }
}

impl Default for FabricPaths {
    fn default() -> Self {
        Self::in_dir(DEFAULT_SOCKET_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_live_in_tmp() {
        let paths = FabricPaths::default();
        assert_eq!(paths.data, PathBuf::from("/tmp/botfabric-data.sock"));
        assert_eq!(paths.logs, PathBuf::from("/tmp/botfabric-logs.sock"));
        assert_eq!(paths.heartbeat, PathBuf::from("/tmp/botfabric-heartbeat.sock"));
    }

    #[test]
    fn in_dir_relocates_every_socket() {
        let paths = FabricPaths::in_dir("/run/robot");
        assert_eq!(paths.data, PathBuf::from("/run/robot/botfabric-data.sock"));
        assert_eq!(paths.heartbeat, PathBuf::from("/run/robot/botfabric-heartbeat.sock"));
    }
}
