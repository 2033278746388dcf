//! IPC for daemon communication.
//!
//! Unix domain socket carrying newline-delimited JSON. Front-ends and
//! `ccai ctl` send commands and may subscribe to pushed events.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod server;
mod types;

pub use server::{CommandHandler, IpcServer};
pub use types::*;

/// Overrides the socket location.
pub const SOCKET_ENV: &str = "CCAI_SOCKET";

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Failed to bind: {0}")]
    BindFailed(String),

    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    RecvFailed(String),

    #[error("Daemon not running")]
    NotRunning,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Get the IPC socket path.
pub fn ipc_path() -> PathBuf {
    if let Ok(path) = std::env::var(SOCKET_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("ccai.sock")
}

/// Blocking IPC client used by the CLI.
pub struct IpcClient {
    stream: UnixStream,
    reader: BufReader<UnixStream>,
}

impl IpcClient {
    /// Connect to the daemon at the default socket.
    pub fn connect() -> Result<Self, IpcError> {
        Self::connect_to(&ipc_path())
    }

    pub fn connect_to(path: &Path) -> Result<Self, IpcError> {
        if !path.exists() {
            return Err(IpcError::NotRunning);
        }

        let stream = UnixStream::connect(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                IpcError::NotRunning
            } else {
                IpcError::ConnectFailed(e.to_string())
            }
        })?;

        // Generate waits on the provider, so reads get more than its timeout
        stream.set_read_timeout(Some(Duration::from_secs(90))).ok();
        stream.set_write_timeout(Some(Duration::from_secs(5))).ok();

        let reader = BufReader::new(
            stream
                .try_clone()
                .map_err(|e| IpcError::ConnectFailed(e.to_string()))?,
        );

        Ok(Self { stream, reader })
    }

    /// Send command and get response.
    pub fn send(&mut self, cmd: &IpcCommand) -> Result<IpcResponse, IpcError> {
        let json = serde_json::to_string(cmd).map_err(|e| IpcError::Serialization(e.to_string()))?;
        let line = self.send_raw(&json)?;
        serde_json::from_str(&line).map_err(|e| IpcError::RecvFailed(e.to_string()))
    }

    /// Send one raw JSON line and return the raw response line.
    pub fn send_raw(&mut self, json: &str) -> Result<String, IpcError> {
        writeln!(self.stream, "{}", json.trim()).map_err(|e| IpcError::SendFailed(e.to_string()))?;
        self.stream
            .flush()
            .map_err(|e| IpcError::SendFailed(e.to_string()))?;
        self.read_line()
    }

    /// Subscribe and return a blocking iterator over pushed events.
    pub fn subscribe(mut self) -> Result<EventStream, IpcError> {
        let response = self.send(&IpcCommand::Subscribe)?;
        if !response.ok {
            return Err(IpcError::RecvFailed(
                response.error.unwrap_or_else(|| "subscribe rejected".to_string()),
            ));
        }
        self.stream.set_read_timeout(None).ok();
        Ok(EventStream { client: self })
    }

    fn read_line(&mut self) -> Result<String, IpcError> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .map_err(|e| IpcError::RecvFailed(e.to_string()))?;
        if read == 0 {
            return Err(IpcError::ConnectionClosed);
        }
        Ok(line)
    }
}

/// Events from a subscribed connection; ends when the daemon hangs up.
pub struct EventStream {
    client: IpcClient,
}

impl Iterator for EventStream {
    type Item = Result<IpcEvent, IpcError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.client.read_line() {
            Ok(line) => Some(
                serde_json::from_str(&line).map_err(|e| IpcError::RecvFailed(e.to_string())),
            ),
            Err(IpcError::ConnectionClosed) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_missing_socket_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let result = IpcClient::connect_to(&dir.path().join("absent.sock"));
        assert!(matches!(result, Err(IpcError::NotRunning)));
    }

    #[test]
    fn test_ipc_path_file_name() {
        if std::env::var(SOCKET_ENV).is_err() {
            assert_eq!(ipc_path().file_name().unwrap(), "ccai.sock");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_client_against_server() {
        use async_trait::async_trait;
        use std::sync::Arc;
        use tokio::sync::{broadcast, watch};

        struct PingOnly;

        #[async_trait]
        impl CommandHandler for PingOnly {
            async fn handle(&self, cmd: IpcCommand) -> IpcResponse {
                match cmd {
                    IpcCommand::Ping => IpcResponse::pong(),
                    _ => IpcResponse::error("unsupported"),
                }
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ccai.sock");
        let (events, _) = broadcast::channel(4);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let server = IpcServer::bind(&path, events.clone()).unwrap();
        let task = tokio::spawn(async move {
            server.serve(Arc::new(PingOnly), shutdown_rx).await;
        });

        let client_path = path.clone();
        let (pong, raw) = tokio::task::spawn_blocking(move || {
            let mut client = IpcClient::connect_to(&client_path).unwrap();
            let pong = client.send(&IpcCommand::Ping).unwrap();
            let raw = client.send_raw(r#"{"cmd":"stop"}"#).unwrap();
            (pong, raw)
        })
        .await
        .unwrap();

        assert!(pong.ok);
        assert!(raw.contains("unsupported"));

        let _ = shutdown.send(true);
        task.await.unwrap();
    }
}
