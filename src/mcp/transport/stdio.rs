//! Newline-delimited JSON-RPC over a spawned subprocess.

use super::{McpTransport, StdioEndpoint};
use crate::mcp::error::McpError;
use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::{RequestId, RpcError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStderr, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

const STDIN_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const STDIN_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type PendingMap = Arc<StdMutex<HashMap<RequestId, oneshot::Sender<ServerMessage>>>>;
type SharedStdin = Arc<Mutex<ChildStdin>>;

pub struct StdioTransport {
    label: String,
    stdin: SharedStdin,
    pending: PendingMap,
    next_request_id: AtomicI64,
    closed: Arc<AtomicBool>,
    shutdown: CancellationToken,
    exit_watcher: Mutex<Option<JoinHandle<()>>>,
}

/// Removes a pending request slot when the waiting call finishes or is
/// dropped by a deadline.
struct PendingEntry<'a> {
    pending: &'a PendingMap,
    request_id: RequestId,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        lock_pending(self.pending).remove(&self.request_id);
    }
}

fn lock_pending(
    pending: &PendingMap,
) -> std::sync::MutexGuard<'_, HashMap<RequestId, oneshot::Sender<ServerMessage>>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Returns true when a stderr line contains one of the configured patterns.
pub(crate) fn stderr_line_matches(line: &str, patterns: &[String]) -> bool {
    let line = line.to_ascii_lowercase();
    patterns
        .iter()
        .map(|pattern| pattern.trim())
        .filter(|pattern| !pattern.is_empty())
        .any(|pattern| line.contains(&pattern.to_ascii_lowercase()))
}

impl StdioTransport {
    pub async fn open(endpoint: &StdioEndpoint) -> Result<Arc<Self>, McpError> {
        if endpoint.command.trim().is_empty() {
            return Err(McpError::TransportUnavailable(
                "MCP command is required for stdio transport.".to_string(),
            ));
        }

        debug!(command = %endpoint.command, args = ?endpoint.args, "Starting MCP stdio server");
        let mut cmd = Command::new(&endpoint.command);
        cmd.args(&endpoint.args)
            .envs(&endpoint.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            McpError::TransportUnavailable(format!(
                "Failed to spawn `{}`: {}",
                endpoint.command, err
            ))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::TransportUnavailable("Unable to retrieve stdin.".to_string()))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            McpError::TransportUnavailable("Unable to retrieve stdout.".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            McpError::TransportUnavailable("Unable to retrieve stderr.".to_string())
        })?;

        let label = endpoint.command.clone();
        let stdin: SharedStdin = Arc::new(Mutex::new(stdin));
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();

        Self::spawn_stdout_reader(
            stdout,
            label.clone(),
            pending.clone(),
            stdin.clone(),
            closed.clone(),
            shutdown.clone(),
        );
        Self::spawn_stderr_filter(
            stderr,
            label.clone(),
            endpoint.stderr_patterns.clone(),
            shutdown.clone(),
        );
        let exit_watcher = Self::spawn_exit_watcher(
            child,
            label.clone(),
            pending.clone(),
            closed.clone(),
            shutdown.clone(),
        );

        Ok(Arc::new(Self {
            label,
            stdin,
            pending,
            next_request_id: AtomicI64::new(0),
            closed,
            shutdown,
            exit_watcher: Mutex::new(Some(exit_watcher)),
        }))
    }

    fn spawn_stdout_reader(
        stdout: ChildStdout,
        label: String,
        pending: PendingMap,
        stdin: SharedStdin,
        closed: Arc<AtomicBool>,
        shutdown: CancellationToken,
    ) {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            loop {
                let line = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    line = reader.next_line() => line,
                };
                let Ok(Some(line)) = line else {
                    break;
                };
                let value = match serde_json::from_str::<serde_json::Value>(&line) {
                    Ok(value) => value,
                    Err(_) => {
                        trace!(server = %label, "Ignoring non-JSON stdout line");
                        continue;
                    }
                };
                if let Some(items) = value.as_array() {
                    for item in items {
                        if let Ok(message) = serde_json::from_value::<ServerMessage>(item.clone()) {
                            Self::dispatch_message(&pending, &stdin, message, &label).await;
                        }
                    }
                } else if let Ok(message) = serde_json::from_value::<ServerMessage>(value) {
                    Self::dispatch_message(&pending, &stdin, message, &label).await;
                }
            }

            debug!(server = %label, "MCP stdio stdout closed");
            closed.store(true, Ordering::SeqCst);
            lock_pending(&pending).clear();
        });
    }

    fn spawn_stderr_filter(
        stderr: ChildStderr,
        label: String,
        patterns: Vec<String>,
        shutdown: CancellationToken,
    ) {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            loop {
                let line = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    line = reader.next_line() => line,
                };
                let Ok(Some(line)) = line else {
                    break;
                };
                if stderr_line_matches(&line, &patterns) {
                    warn!(server = %label, "{}", line.trim());
                } else {
                    trace!(server = %label, line = %line, "MCP stdio stderr");
                }
            }
        });
    }

    fn spawn_exit_watcher(
        mut child: Child,
        label: String,
        pending: PendingMap,
        closed: Arc<AtomicBool>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => info!(server = %label, status = %status, "MCP stdio server exited"),
                        Err(err) => warn!(server = %label, error = %err, "Failed waiting on MCP stdio server"),
                    }
                }
                _ = shutdown.cancelled() => {
                    if let Err(err) = child.kill().await {
                        warn!(server = %label, error = %err, "Failed to kill MCP stdio server");
                    } else {
                        debug!(server = %label, "MCP stdio server killed");
                    }
                }
            }
            closed.store(true, Ordering::SeqCst);
            lock_pending(&pending).clear();
        })
    }

    async fn dispatch_message(
        pending: &PendingMap,
        stdin: &SharedStdin,
        message: ServerMessage,
        label: &str,
    ) {
        match &message {
            ServerMessage::Response(response) => {
                debug!(server = %label, response_id = ?response.id, "Received MCP stdio response");
                let id = response.id.clone();
                if let Some(tx) = lock_pending(pending).remove(&id) {
                    let _ = tx.send(message);
                }
            }
            ServerMessage::Error(error) => {
                debug!(
                    server = %label,
                    error_id = ?error.id,
                    error_code = error.error.code,
                    "Received MCP stdio error"
                );
                if let Some(id) = error.id.clone() {
                    if let Some(tx) = lock_pending(pending).remove(&id) {
                        let _ = tx.send(message);
                    }
                }
            }
            ServerMessage::Request(request) => {
                debug!(
                    server = %label,
                    method = %request.method(),
                    request_id = ?request.request_id(),
                    "Refusing MCP stdio server request"
                );
                let error = RpcError::method_not_found()
                    .with_message("Server-initiated requests are not supported.");
                let reply = ClientMessage::from_message(
                    MessageFromClient::Error(error),
                    Some(request.request_id().clone()),
                );
                match reply {
                    Ok(reply) => {
                        if let Err(err) = write_message(stdin, &reply).await {
                            debug!(server = %label, error = %err, "Failed to refuse server request");
                        }
                    }
                    Err(err) => debug!(server = %label, error = %err, "Failed to build refusal"),
                }
            }
            ServerMessage::Notification(_) => {
                debug!(server = %label, "Received MCP stdio notification");
            }
        }
    }

    fn next_request_id(&self) -> RequestId {
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        RequestId::Integer(id)
    }

    fn ensure_open(&self) -> Result<(), McpError> {
        if self.is_closed() {
            return Err(McpError::TransportUnavailable(format!(
                "MCP stdio server `{}` is not running.",
                self.label
            )));
        }
        Ok(())
    }
}

async fn write_message(stdin: &SharedStdin, message: &ClientMessage) -> Result<(), McpError> {
    let payload =
        serde_json::to_string(message).map_err(|err| McpError::Protocol(err.to_string()))?;
    let mut stdin = tokio::time::timeout(STDIN_LOCK_TIMEOUT, stdin.lock())
        .await
        .map_err(|_| {
            McpError::TransportUnavailable("Timed out waiting for MCP stdio stdin lock.".to_string())
        })?;
    tokio::time::timeout(STDIN_WRITE_TIMEOUT, async {
        stdin.write_all(payload.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    })
    .await
    .map_err(|_| McpError::TransportUnavailable("Timed out writing MCP stdio message.".to_string()))?
    .map_err(|err| McpError::TransportUnavailable(err.to_string()))
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send_request(&self, request: RequestFromClient) -> Result<ServerMessage, McpError> {
        self.ensure_open()?;
        let request_id = self.next_request_id();
        debug!(server = %self.label, request_id = ?request_id, "Sending MCP stdio request");
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(request_id.clone()),
        )
        .map_err(|err| McpError::Protocol(err.to_string()))?;

        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(request_id.clone(), tx);
        let _entry = PendingEntry {
            pending: &self.pending,
            request_id,
        };

        write_message(&self.stdin, &message).await?;
        rx.await.map_err(|_| {
            McpError::TransportUnavailable(format!(
                "MCP stdio server `{}` exited before responding.",
                self.label
            ))
        })
    }

    async fn send_notification(
        &self,
        notification: NotificationFromClient,
    ) -> Result<(), McpError> {
        self.ensure_open()?;
        let message = ClientMessage::from_message(
            MessageFromClient::NotificationFromClient(notification),
            None,
        )
        .map_err(|err| McpError::Protocol(err.to_string()))?;
        write_message(&self.stdin, &message).await
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), McpError> {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
        let watcher = self.exit_watcher.lock().await.take();
        let Some(watcher) = watcher else {
            return Ok(());
        };
        debug!(server = %self.label, "Closing MCP stdio transport");
        match tokio::time::timeout(CLOSE_TIMEOUT, watcher).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(McpError::TransportUnavailable(format!(
                "MCP stdio exit watcher failed: {err}"
            ))),
            Err(_) => Err(McpError::TransportUnavailable(
                "Timed out waiting for MCP stdio server to exit.".to_string(),
            )),
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
