//! Length-free line framing of JSON over Unix-domain sockets.
//!
//! Each request and each response is one line holding `hex(json_bytes)`.
//! A request is `[method, kwargs]`; a response is `["good", result]` or
//! `["bad", message]`, where the message is the `Display` form of a domain
//! error and is re-raised by kind on the caller's side. Anything that is
//! not a domain error (framing faults, unknown methods, decode failures)
//! closes the connection instead of crossing it.
//!
//! The socket file itself is world-writable; whether a caller can reach it
//! at all is decided by the traversal bits on the directory it lives in.
//! Handlers execute under one server-wide lock, so each service is a
//! serialization point for the state it owns.

use crate::MintError;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;

/// `<root>/rpc/<Service>/sock`
pub fn socket_path(root: &Path, service: &str) -> PathBuf {
    root.join("rpc").join(service).join("sock")
}

/// Block until the socket file shows up, or give up after `timeout`.
///
/// Launch order is the only dependency tracking there is: whoever spawns a
/// service spins on its socket before starting the next one.
pub async fn wait_for_socket(path: &Path, timeout: std::time::Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;

    while !path.exists() {
        if tokio::time::Instant::now() >= deadline {
            bail!("socket {} never appeared", path.display());
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    Ok(())
}

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, method: &str, kwargs: Value) -> Result<Value, MintError>;
}

/// Serve `handler` on the socket at `path` until the task is dropped.
pub async fn serve(path: &Path, handler: Arc<dyn Handler>) -> Result<()> {
    // A stale socket from a previous run refuses the bind.
    let _ = std::fs::remove_file(path);

    let listener = UnixListener::bind(path)
        .with_context(|| format!("could not bind {}", path.display()))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777))
        .context("could not open up the socket permissions")?;

    let socket = path.display().to_string();
    let lock = Arc::new(Mutex::new(()));

    loop {
        let (stream, _) = listener.accept().await?;
        let handler = handler.clone();
        let lock = lock.clone();
        let socket = socket.clone();

        tokio::spawn(async move {
            tracing::info!(%socket, "opening a connection");
            if let Err(e) = connection(stream, handler, lock, &socket).await {
                tracing::debug!(%socket, error = %e, "connection closed");
            }
        });
    }
}

async fn connection(
    stream: UnixStream,
    handler: Arc<dyn Handler>,
    lock: Arc<Mutex<()>>,
    socket: &str,
) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }

        let request = decode_frame(&line)?;
        let (method, kwargs) = split_request(request)?;

        let reply = {
            let _guard = lock.lock().await;
            tracing::info!(%socket, %method, "call");

            match handler.handle(&method, kwargs).await {
                Ok(result) => serde_json::json!(["good", result]),
                Err(e) if e.is_wire() => serde_json::json!(["bad", e.to_string()]),
                Err(e) => bail!("handler failed: {}", e),
            }
        };

        write.write_all(encode_frame(&reply)?.as_bytes()).await?;
        write.flush().await?;
    }
}

/// A connected RPC caller. Methods take `&mut self`; wrap in a mutex to
/// share.
#[derive(Debug)]
pub struct RpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl RpcClient {
    pub async fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .await
            .with_context(|| format!("could not connect to {}", path.display()))?;
        let (read, writer) = stream.into_split();

        Ok(RpcClient {
            reader: BufReader::new(read),
            writer,
        })
    }

    pub async fn call(&mut self, method: &str, kwargs: Value) -> Result<Value, MintError> {
        let frame = encode_frame(&serde_json::json!([method, kwargs]))
            .map_err(|e| MintError::Transport(e.to_string()))?;

        self.writer
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| MintError::Transport(e.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|e| MintError::Transport(e.to_string()))?;

        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| MintError::Transport(e.to_string()))?;
        if n == 0 {
            return Err(MintError::Transport("server closed the connection".into()));
        }

        let response = decode_frame(&line).map_err(|e| MintError::Transport(e.to_string()))?;
        match response {
            Value::Array(mut parts) if parts.len() == 2 => {
                let result = parts.pop().unwrap_or(Value::Null);
                match parts.pop() {
                    Some(Value::String(status)) if status == "good" => Ok(result),
                    Some(Value::String(status)) if status == "bad" => Err(MintError::from_wire(
                        result.as_str().unwrap_or("malformed error"),
                    )),
                    _ => Err(MintError::Transport("protocol violation".into())),
                }
            }
            _ => Err(MintError::Transport("protocol violation".into())),
        }
    }
}

fn encode_frame(value: &Value) -> Result<String> {
    let json = serde_json::to_vec(value).context("failed to encode payload")?;

    Ok(format!("{}\n", hex::encode(json)))
}

fn decode_frame(line: &str) -> Result<Value> {
    let bytes = hex::decode(line.trim()).context("frame is not hex")?;

    serde_json::from_slice(&bytes).context("frame is not JSON")
}

fn split_request(request: Value) -> Result<(String, Value)> {
    match request {
        Value::Array(mut parts) if parts.len() == 2 => {
            let kwargs = parts.pop().unwrap_or(Value::Null);
            match parts.pop() {
                Some(Value::String(method)) => Ok((method, kwargs)),
                _ => bail!("request method is not a string"),
            }
        }
        _ => bail!("request is not a two-element array"),
    }
}
