//! `botfabric-supervisor` binary.
//!
//! Usage: `botfabric-supervisor [manifest.json]`. The manifest path can
//! also come from `BOTFABRIC_MANIFEST`; the default is `./programs.json`.
//! Runs until SIGINT or SIGTERM, then terminates the fleet gracefully.

use botfabric_supervisor::{Supervisor, SupervisorConfig, load_manifest};
use botfabric_transport::FabricPaths;
use std::path::PathBuf;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();

    let manifest_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("BOTFABRIC_MANIFEST").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("programs.json"));

    let entries = match load_manifest(&manifest_path) {
        Ok(entries) => entries,
        Err(e) => {
            error!(error = %e, "cannot read manifest");
            std::process::exit(1);
        }
    };
    info!(manifest = %manifest_path.display(), children = entries.len(), "manifest loaded");

    let config = SupervisorConfig {
        paths: FabricPaths::from_env(),
        ..SupervisorConfig::default()
    };
    let mut supervisor = Supervisor::new(config, entries);

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "cannot install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        let _ = stop_tx.send(true);
    });

    if let Err(e) = supervisor.run(stop_rx).await {
        error!(error = %e, "supervisor failed");
        std::process::exit(1);
    }
}

/// Initialise tracing-subscriber using `RUST_LOG` (defaults to "info").
/// Set `BOTFABRIC_LOG_FORMAT=json` to emit newline-delimited JSON logs.
fn init_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("BOTFABRIC_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }
}
