//! [`Supervisor`] – launch the fleet, relay its logs, watch its heartbeats.
//!
//! One task owns everything: the process records, the heartbeat ledger and
//! the all-healthy bookkeeping live in a single `select!` loop that
//! multiplexes the log channel, the heartbeat channel, the 1 s watchdog
//! tick and the shutdown flag. The only other tasks are thin socket
//! ingesters that parse records off accepted connections and feed the two
//! channels; they hold no state.
//!
//! The supervisor is strictly passive: stale heartbeats and dead children
//! produce log lines, never restarts or kills. The only exception is its
//! own shutdown path, which terminates every still-running child.

use crate::health::HeartbeatLedger;
use crate::manifest::validate_entry;
use crate::process::{ProcessRecord, ProcessState};
use crate::relay::{announce_line, relay_line};
use botfabric_transport::{FabricPaths, JsonLineReader, bind_endpoint};
use botfabric_types::{FabricError, LogRecord, ManifestEntry};
use std::time::{Duration, Instant};
use tokio::net::UnixListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Sender name used for the supervisor's own lines in the unified stream.
pub const SUPERVISOR_NAME: &str = "Supervisor";

/// Capacity of each record ingest channel.
const RECORD_QUEUE: usize = 1024;

/// Tunable thresholds plus the socket endpoints.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub paths: FabricPaths,
    /// A sender silent for longer than this gets a staleness warning.
    pub warn_threshold: Duration,
    /// Minimum spacing between consolidated "all processes healthy" lines.
    pub ok_interval: Duration,
    /// How long a child gets between SIGTERM and SIGKILL at shutdown.
    pub grace_period: Duration,
    /// Watchdog evaluation period.
    pub watchdog_tick: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            paths: FabricPaths::default(),
            warn_threshold: Duration::from_secs(15),
            ok_interval: Duration::from_secs(10),
            grace_period: Duration::from_secs(5),
            watchdog_tick: Duration::from_secs(1),
        }
    }
}

/// The fleet babysitter.
pub struct Supervisor {
    config: SupervisorConfig,
    records: Vec<ProcessRecord>,
    ledger: HeartbeatLedger,
    last_ok_check: Option<Instant>,
}

impl Supervisor {
    /// Build a supervisor for the given manifest entries; nothing is
    /// spawned or bound yet.
    pub fn new(config: SupervisorConfig, entries: Vec<ManifestEntry>) -> Self {
        Self {
            config,
            records: entries.into_iter().map(ProcessRecord::new).collect(),
            ledger: HeartbeatLedger::new(),
            last_ok_check: None,
        }
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped),
    /// then wind the fleet down.
    ///
    /// Binding either ingest socket is the only fatal error; everything
    /// after that is contained and logged.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), FabricError> {
        let log_listener = bind_endpoint(&self.config.paths.logs)?;
        let hb_listener = bind_endpoint(&self.config.paths.heartbeat)?;
        let (log_tx, mut log_rx) = mpsc::channel(RECORD_QUEUE);
        let (hb_tx, mut hb_rx) = mpsc::channel(RECORD_QUEUE);
        let log_ingest = tokio::spawn(ingest_records(log_listener, log_tx, shutdown.clone()));
        let hb_ingest = tokio::spawn(ingest_records(hb_listener, hb_tx, shutdown.clone()));

        println!("{}", announce_line(SUPERVISOR_NAME, "supervisor started"));
        self.launch_children();

        let mut tick = tokio::time::interval(self.config.watchdog_tick);
        loop {
            tokio::select! {
                // A dropped shutdown sender counts as a shutdown; otherwise
                // this arm completes on every poll and the loop spins hot.
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                record = log_rx.recv() => {
                    if let Some(record) = record {
                        if let Some(line) = relay_line(&record) {
                            println!("{line}");
                        }
                    }
                }
                record = hb_rx.recv() => {
                    if let Some(record) = record {
                        self.on_heartbeat(&record);
                    }
                }
                _ = tick.tick() => {
                    for line in self.watchdog_report() {
                        println!("{line}");
                    }
                }
            }
        }

        println!(
            "{}",
            announce_line(SUPERVISOR_NAME, "termination signal received, stopping all processes")
        );
        log_ingest.abort();
        hb_ingest.abort();
        self.shutdown_children().await;
        // Transport endpoints are released last.
        let _ = std::fs::remove_file(&self.config.paths.logs);
        let _ = std::fs::remove_file(&self.config.paths.heartbeat);
        println!("{}", announce_line(SUPERVISOR_NAME, "supervisor exiting"));
        Ok(())
    }

    /// Spawn every manifest entry in order, fire-and-forget.
    ///
    /// A bad entry (validation or spawn failure) is logged and marked
    /// `Exited`; the remaining entries still launch.
    fn launch_children(&mut self) {
        for record in &mut self.records {
            if let Err(e) = validate_entry(&record.spec) {
                warn!(error = %e, "skipping manifest entry");
                println!(
                    "{}",
                    announce_line(SUPERVISOR_NAME, &format!("skipping {}: {e}", record.name()))
                );
                record.state = ProcessState::Exited;
                continue;
            }
            match record.spawn() {
                Ok(pid) => println!(
                    "{}",
                    announce_line(
                        SUPERVISOR_NAME,
                        &format!("launched {} (pid {pid})", record.name())
                    )
                ),
                Err(e) => {
                    warn!(error = %e, "spawn failed");
                    println!(
                        "{}",
                        announce_line(SUPERVISOR_NAME, &format!("failed to launch {}: {e}", record.name()))
                    );
                    record.state = ProcessState::Exited;
                }
            }
        }
    }

    fn on_heartbeat(&mut self, record: &LogRecord) {
        if record.sender.is_empty() {
            return;
        }
        self.ledger.observe(&record.sender);
        if let Some(proc) = self.records.iter_mut().find(|r| r.name() == record.sender) {
            proc.last_heartbeat = Some(Instant::now());
        }
        debug!(sender = %record.sender, "heartbeat");
    }

    /// One watchdog evaluation: report freshly-exited children, warn once
    /// per stale sender, and at most every `ok_interval` print the
    /// consolidated healthy line when the whole fleet is running and fresh.
    ///
    /// A stale sender suppresses the healthy line in the same tick even
    /// when it is not a manifest child.
    fn watchdog_report(&mut self) -> Vec<String> {
        let mut lines = Vec::new();

        for record in &mut self.records {
            if let Some(status) = record.poll() {
                lines.push(announce_line(
                    SUPERVISOR_NAME,
                    &format!("{} exited ({status})", record.name()),
                ));
            }
        }

        let stale = self.ledger.stale(self.config.warn_threshold);
        for (name, age) in &stale {
            lines.push(announce_line(
                SUPERVISOR_NAME,
                &format!("{name} has not sent a heartbeat for {}s", age.as_secs()),
            ));
        }

        let ok_due = self
            .last_ok_check
            .is_none_or(|at| at.elapsed() >= self.config.ok_interval);
        if ok_due {
            let all_ok = stale.is_empty()
                && self.records.iter().all(|r| {
                    r.is_running() && self.ledger.is_fresh(r.name(), self.config.warn_threshold)
                });
            if all_ok {
                lines.push(announce_line(SUPERVISOR_NAME, "all processes healthy"));
            }
            self.last_ok_check = Some(Instant::now());
        }

        lines
    }

    /// Terminate every still-running child gracefully; afterwards every
    /// record is `Exited` and every OS handle reaped.
    async fn shutdown_children(&mut self) {
        let grace = self.config.grace_period;
        for record in &mut self.records {
            if record.is_running() {
                println!(
                    "{}",
                    announce_line(SUPERVISOR_NAME, &format!("terminating {}", record.name()))
                );
                record.terminate(grace).await;
                println!(
                    "{}",
                    announce_line(SUPERVISOR_NAME, &format!("{} terminated", record.name()))
                );
            } else {
                record.state = ProcessState::Exited;
            }
        }
    }

    /// The process records, mainly for inspection after [`run`][Self::run]
    /// returns.
    pub fn records(&self) -> &[ProcessRecord] {
        &self.records
    }
}

/// Accept connections on one ingest socket and feed parsed records into
/// `records`. Malformed lines are logged and skipped; a closed peer just
/// ends its reader.
async fn ingest_records(
    listener: UnixListener,
    records: mpsc::Sender<LogRecord>,
    stop: watch::Receiver<bool>,
) {
    let mut stop_accept = stop.clone();
    loop {
        tokio::select! {
            changed = stop_accept.changed() => {
                if changed.is_err() || *stop_accept.borrow() {
                    return;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let conn_records = records.clone();
                    let conn_stop = stop.clone();
                    tokio::spawn(async move {
                        let mut reader = JsonLineReader::new(stream);
                        let mut stop = conn_stop;
                        loop {
                            tokio::select! {
                                changed = stop.changed() => {
                                    if changed.is_err() || *stop.borrow() {
                                        return;
                                    }
                                }
                                line = reader.next_line() => match line {
                                    Ok(Some(line)) => match serde_json::from_str::<LogRecord>(&line) {
                                        Ok(record) => {
                                            if conn_records.send(record).await.is_err() {
                                                return;
                                            }
                                        }
                                        Err(e) => warn!(error = %e, "skipping malformed record"),
                                    },
                                    Ok(None) => return,
                                    Err(e) => {
                                        warn!(error = %e, "ingest read failed");
                                        return;
                                    }
                                },
                            }
                        }
                    });
                }
                Err(e) => warn!(error = %e, "ingest accept failed"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botfabric_transport::{connect_endpoint, write_json};

    const WAIT: Duration = Duration::from_secs(5);

    fn entry(name: &str, path: &str, args: &[&str]) -> ManifestEntry {
        ManifestEntry {
            name: name.to_string(),
            path: path.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn test_config(dir: &std::path::Path) -> SupervisorConfig {
        SupervisorConfig {
            paths: FabricPaths::in_dir(dir),
            warn_threshold: Duration::from_millis(20),
            ok_interval: Duration::ZERO,
            grace_period: Duration::from_secs(2),
            watchdog_tick: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn stale_sender_warns_and_suppresses_healthy_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = Supervisor::new(test_config(dir.path()), vec![]);
        sup.ledger.observe("CameraManager");
        tokio::time::sleep(Duration::from_millis(30)).await;

        let lines = sup.watchdog_report();
        let warnings: Vec<_> = lines.iter().filter(|l| l.contains("CameraManager")).collect();
        assert_eq!(warnings.len(), 1, "exactly one staleness warning: {lines:?}");
        assert!(warnings[0].contains("has not sent a heartbeat"));
        assert!(
            !lines.iter().any(|l| l.contains("all processes healthy")),
            "healthy line must not appear alongside a staleness warning"
        );
    }

    #[tokio::test]
    async fn healthy_line_respects_ok_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.ok_interval = Duration::from_secs(30);
        let mut sup = Supervisor::new(config, vec![entry("sleeper", "/bin/sleep", &["30"])]);
        sup.launch_children();
        sup.on_heartbeat(&LogRecord::heartbeat("sleeper"));

        let first = sup.watchdog_report();
        assert!(first.iter().any(|l| l.contains("all processes healthy")), "{first:?}");

        // Still healthy, but the interval has not elapsed yet.
        let second = sup.watchdog_report();
        assert!(!second.iter().any(|l| l.contains("all processes healthy")), "{second:?}");

        sup.shutdown_children().await;
    }

    #[tokio::test]
    async fn exited_child_is_reported_once_and_blocks_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = Supervisor::new(test_config(dir.path()), vec![entry("true", "/bin/true", &[])]);
        sup.launch_children();
        sup.on_heartbeat(&LogRecord::heartbeat("true"));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let first = sup.watchdog_report();
        assert!(first.iter().any(|l| l.contains("true exited")), "{first:?}");
        assert!(!first.iter().any(|l| l.contains("all processes healthy")));

        let second = sup.watchdog_report();
        assert!(!second.iter().any(|l| l.contains("true exited")), "{second:?}");
    }

    #[tokio::test]
    async fn bad_manifest_entry_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = Supervisor::new(
            test_config(dir.path()),
            vec![
                entry("ghost", "/nonexistent/ghostd", &[]),
                entry("", "/bin/true", &[]),
                entry("sleeper", "/bin/sleep", &["30"]),
            ],
        );
        sup.launch_children();

        assert_eq!(sup.records[0].state, ProcessState::Exited);
        assert_eq!(sup.records[1].state, ProcessState::Exited);
        assert!(sup.records[2].is_running());

        sup.shutdown_children().await;
        assert!(sup.records.iter().all(|r| r.state == ProcessState::Exited));
    }

    #[tokio::test]
    async fn run_shuts_down_gracefully() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        let paths = config.paths.clone();
        let mut sup = Supervisor::new(config, vec![entry("sleeper", "/bin/sleep", &["30"])]);

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            sup.run(stop_rx).await.unwrap();
            sup
        });

        // Feed one log and one heartbeat through the real sockets while the
        // supervisor is live.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut log_conn = connect_endpoint(&paths.logs).await?;
        write_json(
            &mut log_conn,
            &LogRecord::new("sleeper", botfabric_types::LogLevel::Info, "up"),
        )
        .await?;
        let mut hb_conn = connect_endpoint(&paths.heartbeat).await?;
        write_json(&mut hb_conn, &LogRecord::heartbeat("sleeper")).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;

        stop_tx.send(true)?;
        let sup = tokio::time::timeout(WAIT, handle).await??;
        assert!(sup.records().iter().all(|r| r.state == ProcessState::Exited));
        // Sockets are gone after shutdown.
        assert!(!paths.logs.exists());
        assert!(!paths.heartbeat.exists());
        Ok(())
    }

    #[tokio::test]
    async fn dropped_stop_sender_ends_the_run() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut sup = Supervisor::new(test_config(dir.path()), vec![]);

        let (stop_tx, stop_rx) = watch::channel(false);
        // The flag is never raised; the vanished sender alone must end the
        // loop instead of waking it on every poll.
        drop(stop_tx);
        tokio::time::timeout(WAIT, sup.run(stop_rx)).await??;
        Ok(())
    }
}
