//! [`ClientBinding`] – one process's handle onto the fabric.

use async_trait::async_trait;
use botfabric_transport::{FabricPaths, JsonLineReader, connect_endpoint, write_json};
use botfabric_types::{Envelope, FabricError, LogLevel, LogRecord};
use serde_json::Value;
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Sequential handler for inbound envelopes, dispatched by
/// [`ClientBinding::on_message`]. At most one invocation runs at a time per
/// binding.
#[async_trait]
pub trait MessageHandler: Send {
    async fn handle(&mut self, envelope: Envelope);
}

/// Record routed to one of the two supervisor-bound publish sockets.
enum SideRecord {
    Log(LogRecord),
    Heartbeat(LogRecord),
}

/// A process's membership in the fabric.
///
/// Holds one bidirectional data stream to the router and two outbound
/// publish streams to the supervisor (logs, heartbeats). The publish
/// streams are optional at connect time: a process must keep working when
/// the supervisor is not running, so log and heartbeat traffic silently
/// goes nowhere in that case.
///
/// # Protocol
///
/// The router builds its identity table from traffic only, so
/// [`register`][Self::register] must be called before any addressed send —
/// a name that has never sent anything cannot receive anything. Repeating
/// the call is harmless (the table entry is overwritten with itself).
///
/// The binding is designed to be shared behind an [`std::sync::Arc`]: every
/// method takes `&self`, and [`stop`][Self::stop] may be called from any
/// task to wind down the heartbeat and message loops at their next
/// suspension point.
pub struct ClientBinding {
    name: String,
    // `None` once the binding is stopped and the half has been released.
    data_writer: Mutex<Option<OwnedWriteHalf>>,
    data_reader: Mutex<Option<JsonLineReader<OwnedReadHalf>>>,
    side_tx: mpsc::UnboundedSender<SideRecord>,
    stop_tx: watch::Sender<bool>,
}

impl ClientBinding {
    /// Join the fabric as `name`.
    ///
    /// Fails only when the router's data socket is unreachable; missing log
    /// or heartbeat endpoints are logged and tolerated.
    pub async fn connect(name: impl Into<String>, paths: &FabricPaths) -> Result<Self, FabricError> {
        let name = name.into();
        let data = connect_endpoint(&paths.data).await?;
        let (read_half, write_half) = data.into_split();

        let logs = match connect_endpoint(&paths.logs).await {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!(name = %name, error = %e, "log endpoint unavailable, logs will be dropped");
                None
            }
        };
        let heartbeats = match connect_endpoint(&paths.heartbeat).await {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!(name = %name, error = %e, "heartbeat endpoint unavailable, heartbeats will be dropped");
                None
            }
        };

        let (side_tx, side_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(drain_side_channel(logs, heartbeats, side_rx, stop_rx));

        Ok(Self {
            name,
            data_writer: Mutex::new(Some(write_half)),
            data_reader: Mutex::new(Some(JsonLineReader::new(read_half))),
            side_tx,
            stop_tx,
        })
    }

    /// Logical name this binding registered (or will register) under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send the registration-only envelope so the router learns our name.
    ///
    /// Mandatory before any addressed traffic; idempotent when repeated.
    pub async fn register(&self) -> Result<(), FabricError> {
        self.send_envelope(&Envelope::register(self.name.as_str())).await
    }

    /// Send an addressed `data` envelope through the router.
    ///
    /// Delivery is at-most-once: a target that is unknown to the router is
    /// dropped there without any error surfacing here.
    pub async fn send(
        &self,
        target: impl Into<String>,
        command: impl Into<String>,
        data: Value,
    ) -> Result<(), FabricError> {
        self.send_envelope(&Envelope::data(self.name.as_str(), target, command, data))
            .await
    }

    /// Send a pre-built envelope through the router.
    ///
    /// Fails once the binding has been stopped and its write half released.
    pub async fn send_envelope(&self, envelope: &Envelope) -> Result<(), FabricError> {
        let mut writer = self.data_writer.lock().await;
        match writer.as_mut() {
            Some(writer) => write_json(writer, envelope).await,
            None => Err(FabricError::Transport("binding is stopped".to_string())),
        }
    }

    /// Fire-and-forget structured log emission.
    ///
    /// Never blocks beyond enqueueing and never surfaces a failure: logging
    /// must not be able to crash the producer.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let _ = self
            .side_tx
            .send(SideRecord::Log(LogRecord::new(self.name.as_str(), level, message)));
    }

    /// Start the periodic heartbeat task.
    ///
    /// Republishes a heartbeat record every `interval` until
    /// [`stop`][Self::stop] is called. This is the sole liveness signal the
    /// supervisor trusts.
    pub fn spawn_heartbeat(&self, interval: Duration) -> JoinHandle<()> {
        let name = self.name.clone();
        let side_tx = self.side_tx.clone();
        let mut stop = self.stop_tx.subscribe();
        tokio::spawn(async move {
            loop {
                if *stop.borrow() {
                    break;
                }
                let _ = side_tx.send(SideRecord::Heartbeat(LogRecord::heartbeat(name.as_str())));
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    // A dropped sender means the binding is gone; treat it
                    // exactly like stop() or this loop spins hot.
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(name = %name, "heartbeat loop stopped");
        })
    }

    /// Await the next envelope addressed to this binding.
    ///
    /// Returns `Ok(None)` once the binding is stopped or the router
    /// connection closes. Malformed lines and envelopes addressed elsewhere
    /// are skipped.
    pub async fn recv(&self) -> Result<Option<Envelope>, FabricError> {
        // A fresh subscription has already seen the current value, so a
        // binding stopped before this call must bail out here.
        if self.is_stopped() {
            return Ok(None);
        }
        let mut reader = self.data_reader.lock().await;
        let mut stop = self.stop_tx.subscribe();
        loop {
            // Scope the borrow of the read half so the terminal branches
            // below can release it.
            let line = {
                let Some(lines) = reader.as_mut() else {
                    return Ok(None);
                };
                tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            None
                        } else {
                            continue;
                        }
                    }
                    line = lines.next_line() => Some(line),
                }
            };
            let Some(line) = line else {
                // Stopped: drop the read half while we hold the lock.
                reader.take();
                return Ok(None);
            };
            match line {
                Ok(Some(line)) => {
                    let envelope: Envelope = match serde_json::from_str(&line) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            warn!(name = %self.name, error = %e, "skipping malformed envelope");
                            continue;
                        }
                    };
                    if envelope.target.as_deref() != Some(self.name.as_str()) {
                        continue;
                    }
                    return Ok(Some(envelope));
                }
                Ok(None) => {
                    reader.take();
                    return Ok(None);
                }
                Err(e) => {
                    warn!(name = %self.name, error = %e, "data stream read failed");
                    reader.take();
                    return Ok(None);
                }
            }
        }
    }

    /// Dispatch inbound envelopes to `handler`, one at a time, until the
    /// binding is stopped or the router connection closes.
    ///
    /// Only envelopes addressed to this binding *and* matching `predicate`
    /// reach the handler; everything else is skipped. Handler invocations
    /// never overlap.
    pub async fn on_message<P>(&self, predicate: P, handler: &mut (dyn MessageHandler + '_))
    where
        P: Fn(&Envelope) -> bool + Send,
    {
        loop {
            match self.recv().await {
                Ok(Some(envelope)) => {
                    if predicate(&envelope) {
                        handler.handle(envelope).await;
                    }
                }
                Ok(None) => break,
                // recv never returns Err today, but keep the loop honest.
                Err(e) => {
                    warn!(name = %self.name, error = %e, "message loop error");
                    break;
                }
            }
        }
        debug!(name = %self.name, "message loop stopped");
    }

    /// Mark the binding inactive and release its transport handles.
    ///
    /// Every background loop (heartbeat, message loop, side-channel writer)
    /// observes the flag at its next suspension point and exits. The data
    /// stream halves are dropped here when uncontended; a half currently
    /// held by an in-flight [`recv`][Self::recv] is dropped by that call as
    /// it observes the flag. Safe to call from any task, idempotent.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
        if let Ok(mut writer) = self.data_writer.try_lock() {
            writer.take();
        }
        if let Ok(mut reader) = self.data_reader.try_lock() {
            reader.take();
        }
    }

    /// `true` once [`stop`][Self::stop] has been called.
    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }
}

/// Drain log and heartbeat records onto their publish sockets.
///
/// A write failure disables that socket for the rest of the binding's life
/// (one warning, then records are silently dropped), so a vanished
/// supervisor can never take a producer down with it.
async fn drain_side_channel(
    mut logs: Option<UnixStream>,
    mut heartbeats: Option<UnixStream>,
    mut records: mpsc::UnboundedReceiver<SideRecord>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let record = tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
            record = records.recv() => match record {
                Some(record) => record,
                None => break,
            },
        };
        match record {
            SideRecord::Log(record) => {
                if let Some(stream) = logs.as_mut() {
                    if let Err(e) = write_json(stream, &record).await {
                        warn!(error = %e, "log publish failed, disabling log stream");
                        logs = None;
                    }
                }
            }
            SideRecord::Heartbeat(record) => {
                if let Some(stream) = heartbeats.as_mut() {
                    if let Err(e) = write_json(stream, &record).await {
                        warn!(error = %e, "heartbeat publish failed, disabling heartbeat stream");
                        heartbeats = None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botfabric_router::serve;
    use botfabric_transport::bind_endpoint;
    use botfabric_types::{KnownPayload, Payload};
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::watch;

    const TICK: Duration = Duration::from_millis(50);
    const WAIT: Duration = Duration::from_secs(2);

    /// Router on a temp socket plus the paths clients should use.
    async fn start_router(dir: &std::path::Path) -> (watch::Sender<bool>, FabricPaths) {
        let paths = FabricPaths::in_dir(dir);
        let listener = bind_endpoint(&paths.data).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(serve(listener, stop_rx));
        (stop_tx, paths)
    }

    struct Collector {
        tx: mpsc::UnboundedSender<Envelope>,
    }

    #[async_trait]
    impl MessageHandler for Collector {
        async fn handle(&mut self, envelope: Envelope) {
            let _ = self.tx.send(envelope);
        }
    }

    #[tokio::test]
    async fn end_to_end_request_reply() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (_router_stop, paths) = start_router(dir.path()).await;

        let alice = ClientBinding::connect("alice", &paths).await?;
        let bob = ClientBinding::connect("bob", &paths).await?;
        alice.register().await?;
        bob.register().await?;
        tokio::time::sleep(TICK).await;

        alice.send("bob", "data", json!({"x": 1})).await?;
        let received = tokio::time::timeout(WAIT, bob.recv())
            .await??
            .expect("bob receives alice's envelope");
        assert_eq!(received.sender.as_deref(), Some("alice"));
        assert_eq!(received.target.as_deref(), Some("bob"));
        match received.payload {
            Payload::Known(KnownPayload::Data { ref data, .. }) => {
                assert_eq!(data["x"], 1);
            }
            ref other => panic!("unexpected payload: {other:?}"),
        }

        bob.send("alice", "data", json!({"x": 2})).await?;
        let reply = tokio::time::timeout(WAIT, alice.recv())
            .await??
            .expect("alice receives bob's reply");
        assert_eq!(reply.sender.as_deref(), Some("bob"));
        match reply.payload {
            Payload::Known(KnownPayload::Data { ref data, .. }) => {
                assert_eq!(data["x"], 2);
            }
            ref other => panic!("unexpected payload: {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn on_message_dispatches_sequentially_and_stops() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (_router_stop, paths) = start_router(dir.path()).await;

        let alice = ClientBinding::connect("alice", &paths).await?;
        let bob = Arc::new(ClientBinding::connect("bob", &paths).await?);
        alice.register().await?;
        bob.register().await?;
        tokio::time::sleep(TICK).await;

        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let loop_bob = bob.clone();
        let message_loop = tokio::spawn(async move {
            let mut collector = Collector { tx: seen_tx };
            loop_bob
                .on_message(|_| true, &mut collector)
                .await;
        });

        alice.send("bob", "M1", json!(null)).await?;
        alice.send("bob", "M2", json!(null)).await?;

        let first = tokio::time::timeout(WAIT, seen_rx.recv()).await?.unwrap();
        let second = tokio::time::timeout(WAIT, seen_rx.recv()).await?.unwrap();
        let command = |env: &Envelope| match env.payload {
            Payload::Known(KnownPayload::Data { ref command, .. }) => command.clone(),
            _ => panic!("unexpected payload"),
        };
        assert_eq!(command(&first), "M1");
        assert_eq!(command(&second), "M2");

        // stop() from outside the loop's task ends it at the next
        // suspension point.
        bob.stop();
        tokio::time::timeout(WAIT, message_loop).await??;
        Ok(())
    }

    #[tokio::test]
    async fn heartbeat_publishes_until_stopped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (_router_stop, paths) = start_router(dir.path()).await;
        // Stand in for the supervisor's heartbeat endpoint.
        let hb_listener = bind_endpoint(&paths.heartbeat)?;

        let binding = ClientBinding::connect("CameraManager", &paths).await?;
        let heartbeat = binding.spawn_heartbeat(Duration::from_millis(10));

        let (stream, _) = tokio::time::timeout(WAIT, hb_listener.accept()).await??;
        let mut reader = JsonLineReader::new(stream);
        for _ in 0..2 {
            let line = tokio::time::timeout(WAIT, reader.next_line())
                .await??
                .expect("heartbeat record");
            let record: LogRecord = serde_json::from_str(&line)?;
            assert_eq!(record.sender, "CameraManager");
            assert_eq!(record.level, LogLevel::Heartbeat);
        }

        binding.stop();
        tokio::time::timeout(WAIT, heartbeat).await??;
        Ok(())
    }

    #[tokio::test]
    async fn logging_without_supervisor_never_fails() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        // Router only; no log or heartbeat endpoints anywhere.
        let (_router_stop, paths) = start_router(dir.path()).await;

        let binding = ClientBinding::connect("DisplayManager", &paths).await?;
        binding.log(LogLevel::Info, "screen ready");
        binding.log(LogLevel::Warn, "");

        // The data path still works fine.
        binding.register().await?;
        tokio::time::sleep(TICK).await;
        binding.send("DisplayManager", "SELF", json!(null)).await?;
        let echoed = tokio::time::timeout(WAIT, binding.recv()).await??;
        assert!(echoed.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn register_twice_is_harmless() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (_router_stop, paths) = start_router(dir.path()).await;

        let binding = ClientBinding::connect("alice", &paths).await?;
        binding.register().await?;
        binding.register().await?;
        tokio::time::sleep(TICK).await;

        binding.send("alice", "SELF", json!(null)).await?;
        let echoed = tokio::time::timeout(WAIT, binding.recv()).await??;
        assert!(echoed.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn dropped_binding_ends_the_heartbeat_loop() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (_router_stop, paths) = start_router(dir.path()).await;
        let hb_listener = bind_endpoint(&paths.heartbeat)?;

        let binding = ClientBinding::connect("CameraManager", &paths).await?;
        let heartbeat = binding.spawn_heartbeat(Duration::from_secs(10));
        // The binding goes away without stop() ever being called. The
        // heartbeat loop must treat the vanished stop flag as a stop, not
        // as a wakeup, or it floods the socket as fast as it can spin.
        drop(binding);
        tokio::time::timeout(WAIT, heartbeat).await??;

        let (stream, _) = tokio::time::timeout(WAIT, hb_listener.accept()).await??;
        let mut reader = JsonLineReader::new(stream);
        let mut records = 0usize;
        let window = tokio::time::sleep(Duration::from_millis(300));
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = &mut window => break,
                line = reader.next_line() => match line {
                    Ok(Some(_)) => records += 1,
                    _ => break,
                },
            }
        }
        // At most the record emitted before the first sleep.
        assert!(records <= 1, "heartbeat loop kept publishing after drop: {records} records");
        Ok(())
    }

    #[tokio::test]
    async fn stop_releases_the_data_stream() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (_router_stop, paths) = start_router(dir.path()).await;

        let binding = ClientBinding::connect("alice", &paths).await?;
        binding.register().await?;
        binding.stop();

        assert!(binding.is_stopped());
        assert!(binding.send("alice", "X", json!(null)).await.is_err());
        assert!(binding.recv().await?.is_none());
        Ok(())
    }
}
