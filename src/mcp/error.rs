//! Error kinds reported by transports, sessions and the session manager.

use std::fmt;
use std::time::Duration;

/// Sub-classification of an application-level failure reported by a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    ToolNotFound,
    ResourceNotFound,
    Other,
}

/// A JSON-RPC error surfaced verbatim from the remote server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub code: i64,
    pub message: String,
}

/// Errors produced by the MCP session layer.
///
/// The type is `Clone` because a single connection attempt is shared by every
/// caller waiting on the same identity key, and each of them receives the
/// outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpError {
    /// Required credentials are absent; no connection was attempted.
    NotConfigured {
        server_id: String,
        missing: Vec<String>,
    },
    /// The caller supplied an unusable argument (empty tool name, blank URI).
    InvalidInput(String),
    /// The subprocess could not be spawned, the endpoint could not be reached,
    /// or the channel went away.
    TransportUnavailable(String),
    /// The session was closed before or while the operation ran.
    NotConnected,
    /// Per-identity endpoint allocation failed.
    ProvisioningFailed(String),
    /// The server answered with an application-level error.
    Remote(RemoteError),
    /// The operation exceeded its deadline.
    Timeout(Duration),
    /// The server replied with something that is not a valid MCP message.
    Protocol(String),
}

impl McpError {
    /// Stable, machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            McpError::NotConfigured { .. } => "not_configured",
            McpError::InvalidInput(_) => "invalid_input",
            McpError::TransportUnavailable(_) => "transport_unavailable",
            McpError::NotConnected => "not_connected",
            McpError::ProvisioningFailed(_) => "provisioning_failed",
            McpError::Remote(remote) => match remote.kind {
                RemoteErrorKind::ToolNotFound => "tool_not_found",
                RemoteErrorKind::ResourceNotFound => "resource_not_found",
                RemoteErrorKind::Other => "remote_error",
            },
            McpError::Timeout(_) => "timeout",
            McpError::Protocol(_) => "protocol_error",
        }
    }

    pub fn is_tool_not_found(&self) -> bool {
        matches!(
            self,
            McpError::Remote(RemoteError {
                kind: RemoteErrorKind::ToolNotFound,
                ..
            })
        )
    }

    pub fn is_resource_not_found(&self) -> bool {
        matches!(
            self,
            McpError::Remote(RemoteError {
                kind: RemoteErrorKind::ResourceNotFound,
                ..
            })
        )
    }

    pub(crate) fn not_configured(server_id: &str, missing: &[String]) -> Self {
        McpError::NotConfigured {
            server_id: server_id.to_string(),
            missing: missing.to_vec(),
        }
    }
}

impl fmt::Display for McpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McpError::NotConfigured { server_id, missing } => {
                if missing.is_empty() {
                    write!(f, "MCP server '{server_id}' is not configured")
                } else {
                    write!(
                        f,
                        "MCP server '{server_id}' is not configured; missing {}",
                        missing.join(", ")
                    )
                }
            }
            McpError::InvalidInput(message) => write!(f, "Invalid input: {message}"),
            McpError::TransportUnavailable(message) => {
                write!(f, "MCP transport unavailable: {message}")
            }
            McpError::NotConnected => write!(f, "MCP client not connected."),
            McpError::ProvisioningFailed(message) => {
                write!(f, "MCP endpoint provisioning failed: {message}")
            }
            McpError::Remote(remote) => {
                write!(f, "MCP error {}: {}", remote.code, remote.message)
            }
            McpError::Timeout(deadline) => {
                write!(f, "MCP request timed out after {}ms", deadline.as_millis())
            }
            McpError::Protocol(message) => write!(f, "MCP protocol error: {message}"),
        }
    }
}

impl std::error::Error for McpError {}
