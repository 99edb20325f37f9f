//! Newline-delimited JSON framing over Unix sockets.
//!
//! The router forwards raw line bytes without re-serialising, so the reader
//! side hands out whole lines ([`JsonLineReader::next_line`]) and leaves the
//! decode decision to the caller.

use botfabric_types::FabricError;
use serde::Serialize;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::net::{UnixListener, UnixStream};
use tracing::debug;

/// Bind a listener at `path`, replacing any stale socket file left behind by
/// a previous run.
pub fn bind_endpoint(path: &Path) -> Result<UnixListener, FabricError> {
    if path.exists() {
        std::fs::remove_file(path)
            .map_err(|e| FabricError::Transport(format!("removing stale socket {path:?}: {e}")))?;
    }
    let listener = UnixListener::bind(path)
        .map_err(|e| FabricError::Transport(format!("binding {path:?}: {e}")))?;
    debug!(path = %path.display(), "endpoint bound");
    Ok(listener)
}

/// Connect to the endpoint at `path`.
pub async fn connect_endpoint(path: &Path) -> Result<UnixStream, FabricError> {
    UnixStream::connect(path)
        .await
        .map_err(|e| FabricError::Transport(format!("connecting {path:?}: {e}")))
}

/// Serialize `value` as one JSON line and flush it.
pub async fn write_json<T, W>(writer: &mut W, value: &T) -> Result<(), FabricError>
where
    T: Serialize + ?Sized,
    W: AsyncWrite + Unpin,
{
    let line =
        serde_json::to_string(value).map_err(|e| FabricError::Codec(e.to_string()))?;
    write_line(writer, &line).await
}

/// Write one pre-serialised line and flush it. Used on the router's forward
/// path so the original bytes pass through unmodified.
pub async fn write_line<W>(writer: &mut W, line: &str) -> Result<(), FabricError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| FabricError::Transport(e.to_string()))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| FabricError::Transport(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| FabricError::Transport(e.to_string()))?;
    Ok(())
}

/// Line-at-a-time reader over one inbound stream.
pub struct JsonLineReader<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> JsonLineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }

    /// Next raw line, or `None` on a clean EOF. Empty lines are skipped.
    pub async fn next_line(&mut self) -> Result<Option<String>, FabricError> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Ok(Some(line)),
                Ok(None) => return Ok(None),
                Err(e) => return Err(FabricError::Transport(e.to_string())),
            }
        }
    }
}
