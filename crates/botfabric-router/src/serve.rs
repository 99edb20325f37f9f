//! Socket wiring for the router task.
//!
//! Each accepted connection gets a monotonically increasing [`ConnId`], a
//! reader task that turns its lines into events for the router task, and a
//! writer task that drains the connection's outbound channel. All routing
//! state stays inside the single router task; the reader/writer tasks only
//! move bytes.

use crate::router::{ConnId, Router};
use botfabric_transport::{JsonLineReader, write_line};
use botfabric_types::FabricError;
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// How often the router notes it is still alive in its own log.
const PULSE_INTERVAL: Duration = Duration::from_secs(360);

/// Capacity of the inbound event channel shared by all reader tasks.
const EVENT_QUEUE: usize = 1024;

enum RouterEvent {
    Inbound(ConnId, String),
    Disconnected(ConnId),
}

/// Run the router over `listener` until `shutdown` flips to `true` or its
/// sender is dropped.
///
/// The loop never dies on a per-connection failure: accept errors, malformed
/// lines and closed peers are logged and the next message is processed. A
/// router restart loses the whole identity table; clients re-register on the
/// next message they send.
pub async fn serve(
    listener: UnixListener,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), FabricError> {
    let (event_tx, mut event_rx) = mpsc::channel::<RouterEvent>(EVENT_QUEUE);
    let mut router = Router::new();
    let mut next_conn: ConnId = 0;
    let mut pulse = tokio::time::interval(PULSE_INTERVAL);

    info!("router started");
    loop {
        tokio::select! {
            // A dropped shutdown sender counts as a shutdown; otherwise
            // this arm completes on every poll and the loop spins hot.
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = pulse.tick() => {
                debug!(connections = router.connection_count(), "router heartbeat");
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    next_conn += 1;
                    let conn = next_conn;
                    let (read_half, write_half) = stream.into_split();
                    let (out_tx, out_rx) = mpsc::unbounded_channel();
                    router.attach(conn, out_tx);
                    tokio::spawn(write_connection(conn, write_half, out_rx));
                    tokio::spawn(read_connection(conn, read_half, event_tx.clone()));
                    debug!(conn, "client connected");
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
            event = event_rx.recv() => match event {
                Some(RouterEvent::Inbound(conn, line)) => router.handle_line(conn, &line),
                Some(RouterEvent::Disconnected(conn)) => {
                    router.detach(conn);
                    debug!(conn, "client disconnected");
                }
                // All reader tasks and our own accept arm hold senders, so
                // this only happens on teardown.
                None => break,
            },
        }
    }
    info!("router stopped");
    Ok(())
}

async fn read_connection(
    conn: ConnId,
    read_half: OwnedReadHalf,
    events: mpsc::Sender<RouterEvent>,
) {
    let mut reader = JsonLineReader::new(read_half);
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                if events.send(RouterEvent::Inbound(conn, line)).await.is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(conn, error = %e, "read failed");
                break;
            }
        }
    }
    let _ = events.send(RouterEvent::Disconnected(conn)).await;
}

async fn write_connection(
    conn: ConnId,
    mut write_half: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    while let Some(line) = outbound.recv().await {
        if let Err(e) = write_line(&mut write_half, &line).await {
            warn!(conn, error = %e, "write failed, closing connection");
            return;
        }
    }
}
