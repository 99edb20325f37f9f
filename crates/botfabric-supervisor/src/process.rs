//! Supervisor-owned bookkeeping for one launched child process.

use botfabric_types::{FabricError, ManifestEntry};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::warn;

/// Lifecycle of a supervised child.
///
/// `Starting -> Running` on a successful spawn, `-> Exited` when the OS
/// process terminates (observed via a non-blocking poll). `Degraded` is
/// reserved for a future health-driven transition; today heartbeat
/// staleness only produces a warning and never changes the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    Degraded,
    Exited,
}

/// One manifest entry plus its live OS handle and state.
///
/// The supervisor exclusively owns these records; no other component may
/// signal or reap the child.
pub struct ProcessRecord {
    pub spec: ManifestEntry,
    pub state: ProcessState,
    /// Updated by the supervisor from the heartbeat stream; `None` until
    /// the first heartbeat arrives.
    pub last_heartbeat: Option<Instant>,
    child: Option<Child>,
}

impl ProcessRecord {
    /// Create a record in the `Starting` state; nothing is spawned yet.
    pub fn new(spec: ManifestEntry) -> Self {
        Self {
            spec,
            state: ProcessState::Starting,
            last_heartbeat: None,
            child: None,
        }
    }

    /// Logical name from the manifest.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Launch the child, fire-and-forget: the supervisor does not wait for
    /// the child to register with the router before moving on.
    ///
    /// Returns the OS pid on success.
    pub fn spawn(&mut self) -> Result<u32, FabricError> {
        let child = Command::new(&self.spec.path)
            .args(&self.spec.args)
            .spawn()
            .map_err(|e| FabricError::Spawn {
                name: self.spec.name.clone(),
                reason: e.to_string(),
            })?;
        let pid = child.id().unwrap_or_default();
        self.child = Some(child);
        self.state = ProcessState::Running;
        Ok(pid)
    }

    /// Non-blocking exit check.
    ///
    /// Returns the exit status exactly once, the first time the poll sees
    /// the child gone, and transitions the record to `Exited`.
    pub fn poll(&mut self) -> Option<ExitStatus> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                self.state = ProcessState::Exited;
                self.child = None;
                Some(status)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(name = %self.spec.name, error = %e, "exit poll failed");
                None
            }
        }
    }

    /// `true` while the child has been spawned and not yet observed exited.
    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running && self.child.is_some()
    }

    /// Graceful shutdown: SIGTERM, wait up to `grace`, SIGKILL on timeout.
    ///
    /// Always leaves the record in `Exited` with the OS handle reaped.
    pub async fn terminate(&mut self, grace: Duration) {
        let Some(mut child) = self.child.take() else {
            self.state = ProcessState::Exited;
            return;
        };
        if let Some(pid) = child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!(name = %self.spec.name, error = %e, "SIGTERM failed");
            }
        }
        if tokio::time::timeout(grace, child.wait()).await.is_err() {
            warn!(name = %self.spec.name, "grace period elapsed, force-killing");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        self.state = ProcessState::Exited;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, path: &str, args: &[&str]) -> ManifestEntry {
        ManifestEntry {
            name: name.to_string(),
            path: path.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn spawn_and_poll_short_lived_child() {
        let mut record = ProcessRecord::new(entry("true", "/bin/true", &[]));
        assert_eq!(record.state, ProcessState::Starting);
        record.spawn().unwrap();
        assert_eq!(record.state, ProcessState::Running);

        // Poll until the child is reaped; /bin/true exits immediately.
        let mut status = None;
        for _ in 0..100 {
            if let Some(s) = record.poll() {
                status = Some(s);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let status = status.expect("child exit observed");
        assert!(status.success());
        assert_eq!(record.state, ProcessState::Exited);
        // The status is reported only once.
        assert!(record.poll().is_none());
    }

    #[tokio::test]
    async fn terminate_sends_sigterm_within_grace() {
        let mut record = ProcessRecord::new(entry("sleeper", "/bin/sleep", &["30"]));
        record.spawn().unwrap();
        assert!(record.is_running());

        let started = Instant::now();
        record.terminate(Duration::from_secs(5)).await;
        assert_eq!(record.state, ProcessState::Exited);
        // sleep dies on SIGTERM right away, so this must come in far below
        // the grace period.
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn spawn_missing_executable_fails_with_name() {
        let mut record = ProcessRecord::new(entry("ghost", "/nonexistent/ghostd", &[]));
        let err = record.spawn().unwrap_err();
        assert!(err.to_string().contains("ghost"));
        assert_eq!(record.state, ProcessState::Starting);
        assert!(!record.is_running());
    }

    #[tokio::test]
    async fn terminate_without_child_is_a_noop() {
        let mut record = ProcessRecord::new(entry("never", "/bin/true", &[]));
        record.terminate(Duration::from_millis(10)).await;
        assert_eq!(record.state, ProcessState::Exited);
    }
}
