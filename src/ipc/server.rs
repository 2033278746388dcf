//! IPC server for daemon with event broadcasting.
//!
//! Newline-delimited JSON over a Unix domain socket. Each line from a client
//! is one [`IpcCommand`] and gets exactly one [`IpcResponse`] line back. A
//! `subscribe` command turns the connection into a one-way stream of
//! [`IpcEvent`] lines.

use super::{IpcCommand, IpcError, IpcEvent, IpcResponse};
use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Executes commands received over IPC.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn handle(&self, cmd: IpcCommand) -> IpcResponse;
}

/// IPC server that accepts connections and handles commands.
pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
    events: broadcast::Sender<IpcEvent>,
    next_client_id: AtomicU64,
}

impl IpcServer {
    /// Bind the socket at `path`, replacing a stale one.
    pub fn bind(path: &Path, events: broadcast::Sender<IpcEvent>) -> Result<Self, IpcError> {
        if path.exists() {
            std::fs::remove_file(path).ok();
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let listener = UnixListener::bind(path)
            .map_err(|e| IpcError::BindFailed(format!("{}: {}", path.display(), e)))?;

        // The socket serves clipboard contents and credentials: owner only
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| IpcError::BindFailed(format!("{}: {}", path.display(), e)))?;

        info!("IPC server listening on {}", path.display());

        Ok(Self {
            listener,
            path: path.to_path_buf(),
            events,
            next_client_id: AtomicU64::new(1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` flips to true.
    pub async fn serve<H: CommandHandler>(
        &self,
        handler: Arc<H>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let client_id = self.next_client_id.fetch_add(1, Ordering::SeqCst);
                        debug!("IPC client {} connected", client_id);
                        let handler = handler.clone();
                        let events = self.events.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                serve_client(client_id, stream, handler, events, shutdown).await
                            {
                                debug!("IPC client {} error: {}", client_id, e);
                            }
                            debug!("IPC client {} disconnected", client_id);
                        });
                    }
                    Err(e) => warn!("IPC accept error: {}", e),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("IPC server stopped accepting connections");
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn write_line<T: serde::Serialize>(
    writer: &mut OwnedWriteHalf,
    message: &T,
) -> Result<(), IpcError> {
    let mut json =
        serde_json::to_string(message).map_err(|e| IpcError::Serialization(e.to_string()))?;
    json.push('\n');
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| IpcError::SendFailed(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| IpcError::SendFailed(e.to_string()))
}

async fn serve_client<H: CommandHandler>(
    client_id: u64,
    stream: UnixStream,
    handler: Arc<H>,
    events: broadcast::Sender<IpcEvent>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), IpcError> {
    let (read_half, mut writer) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let cmd = match serde_json::from_str::<IpcCommand>(&line) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!("IPC parse error from client {}: {}", client_id, e);
                write_line(&mut writer, &IpcResponse::error(&format!("Invalid command: {}", e)))
                    .await?;
                continue;
            }
        };

        debug!("IPC command from client {}: {}", client_id, cmd.name());

        if cmd == IpcCommand::Subscribe {
            let receiver = events.subscribe();
            write_line(&mut writer, &IpcResponse::ok()).await?;
            debug!("IPC client {} subscribed to events", client_id);
            return stream_events(client_id, writer, receiver, shutdown).await;
        }

        let response = handler.handle(cmd).await;
        write_line(&mut writer, &response).await?;
    }

    Ok(())
}

async fn stream_events(
    client_id: u64,
    mut writer: OwnedWriteHalf,
    mut receiver: broadcast::Receiver<IpcEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), IpcError> {
    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Ok(event) => write_line(&mut writer, &event).await?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("IPC client {} lagged, {} events dropped", client_id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    struct EchoHandler;

    #[async_trait]
    impl CommandHandler for EchoHandler {
        async fn handle(&self, cmd: IpcCommand) -> IpcResponse {
            match cmd {
                IpcCommand::Ping => IpcResponse::pong(),
                IpcCommand::Estimate { text } => {
                    IpcResponse::with_data(&serde_json::json!({ "echo": text }))
                }
                other => IpcResponse::error(&format!("unhandled: {}", other.name())),
            }
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        path: PathBuf,
        events: broadcast::Sender<IpcEvent>,
        shutdown: watch::Sender<bool>,
        task: tokio::task::JoinHandle<()>,
    }

    async fn start_server() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ccai.sock");
        let (events, _) = broadcast::channel(16);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let server = IpcServer::bind(&path, events.clone()).unwrap();
        let task = tokio::spawn(async move {
            server.serve(Arc::new(EchoHandler), shutdown_rx).await;
        });

        Harness {
            _dir: dir,
            path,
            events,
            shutdown,
            task,
        }
    }

    async fn request(
        lines: &mut tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
        writer: &mut OwnedWriteHalf,
        raw: &str,
    ) -> serde_json::Value {
        writer.write_all(raw.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_request_response() {
        let harness = start_server().await;
        let stream = UnixStream::connect(&harness.path).await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let pong = request(&mut lines, &mut writer, r#"{"cmd":"ping"}"#).await;
        assert_eq!(pong["ok"], true);

        let echo = request(&mut lines, &mut writer, r#"{"cmd":"estimate","text":"hi"}"#).await;
        assert_eq!(echo["data"]["echo"], "hi");

        let _ = harness.shutdown.send(true);
        harness.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_line_gets_error_response() {
        let harness = start_server().await;
        let stream = UnixStream::connect(&harness.path).await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let response = request(&mut lines, &mut writer, "not json").await;
        assert_eq!(response["ok"], false);
        assert!(response["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid command"));

        // connection stays usable
        let pong = request(&mut lines, &mut writer, r#"{"cmd":"ping"}"#).await;
        assert_eq!(pong["ok"], true);
    }

    #[tokio::test]
    async fn test_subscribe_streams_events() {
        let harness = start_server().await;
        let stream = UnixStream::connect(&harness.path).await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let ack = request(&mut lines, &mut writer, r#"{"cmd":"subscribe"}"#).await;
        assert_eq!(ack["ok"], true);

        harness
            .events
            .send(IpcEvent::WindowVisibility { visible: true })
            .unwrap();

        let line = lines.next_line().await.unwrap().unwrap();
        let event: IpcEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(event, IpcEvent::WindowVisibility { visible: true });
    }

    #[tokio::test]
    async fn test_socket_is_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ccai.sock");
        let (events, _) = broadcast::channel(4);

        let _server = IpcServer::bind(&path, events).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_socket_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ccai.sock");
        let (events, _) = broadcast::channel(4);

        let server = IpcServer::bind(&path, events.clone()).unwrap();
        assert!(path.exists());
        drop(server);
        assert!(!path.exists());

        // a stale socket file does not block rebinding
        std::fs::write(&path, b"").unwrap();
        let server = IpcServer::bind(&path, events).unwrap();
        assert_eq!(server.path(), path.as_path());
    }
}
