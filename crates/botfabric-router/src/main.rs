//! `botfabric-router` binary.
//!
//! Binds the fabric data socket (location from `BOTFABRIC_SOCKET_DIR`,
//! default `/tmp`) and brokers addressed envelopes until SIGINT or SIGTERM.

use botfabric_router::serve;
use botfabric_transport::{FabricPaths, bind_endpoint};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();

    let paths = FabricPaths::from_env();
    let listener = match bind_endpoint(&paths.data) {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "cannot bind data socket");
            std::process::exit(1);
        }
    };
    info!(socket = %paths.data.display(), "listening");

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
        info!("termination signal received");
        let _ = stop_tx.send(true);
    });

    if let Err(e) = serve(listener, stop_rx).await {
        error!(error = %e, "router loop failed");
        std::process::exit(1);
    }

    // Leave no stale socket file behind for the next run.
    let _ = std::fs::remove_file(&paths.data);
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
