//! Shared MCP transport abstractions.
//!
//! A transport moves JSON-RPC messages between this process and one remote
//! tool server. Implementations normalize the differences between a spawned
//! stdio subprocess and a streamable HTTP endpoint so the session layer can
//! hold a single `Arc<dyn McpTransport>` regardless of how bytes travel.

use crate::mcp::error::McpError;
use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{NotificationFromClient, RequestFromClient, ServerMessage};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub mod stdio;
pub mod streamable_http;

/// JSON-RPC code used by servers to indicate unsupported methods.
pub const MCP_METHOD_NOT_FOUND: i64 = -32601;

/// Supported MCP transport backends.
///
/// - [`McpTransportKind::Stdio`] for locally spawned processes.
/// - [`McpTransportKind::StreamableHttp`] for remote servers over HTTP/SSE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpTransportKind {
    StreamableHttp,
    Stdio,
}

impl McpTransportKind {
    /// Resolves a configured transport name, defaulting to streamable HTTP.
    pub fn parse(transport: Option<&str>) -> Result<Self, String> {
        let transport = transport.unwrap_or("streamable-http").to_ascii_lowercase();
        match transport.as_str() {
            "streamable-http" | "streamable_http" | "http" => Ok(McpTransportKind::StreamableHttp),
            "stdio" => Ok(McpTransportKind::Stdio),
            other => Err(format!("Unsupported MCP transport: {}", other)),
        }
    }
}

/// How to launch a subprocess-backed server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioEndpoint {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Case-insensitive substrings; stderr lines containing one are logged.
    pub stderr_patterns: Vec<String>,
}

/// How to reach an HTTP-backed server.
#[derive(Clone, PartialEq, Eq)]
pub struct HttpEndpoint {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub bearer_token: Option<String>,
}

impl fmt::Debug for HttpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpEndpoint")
            .field("url", &self.url)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpEndpoint {
    pub fn auth_header(&self) -> Option<String> {
        self.bearer_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .map(|token| format!("Bearer {}", token))
    }
}

/// Immutable description of where a remote tool server lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Stdio(StdioEndpoint),
    StreamableHttp(HttpEndpoint),
}

impl Endpoint {
    pub fn kind(&self) -> McpTransportKind {
        match self {
            Endpoint::Stdio(_) => McpTransportKind::Stdio,
            Endpoint::StreamableHttp(_) => McpTransportKind::StreamableHttp,
        }
    }

    /// Human-readable target without credentials, for logs.
    pub fn describe(&self) -> String {
        match self {
            Endpoint::Stdio(stdio) => stdio.command.clone(),
            Endpoint::StreamableHttp(http) => http.url.clone(),
        }
    }
}

#[async_trait]
/// Bidirectional message channel to one remote tool server.
///
/// Requests are delivered in issue order; `close` is idempotent and
/// `is_closed` flips to true when the channel terminates for any reason.
pub trait McpTransport: Send + Sync {
    async fn send_request(&self, request: RequestFromClient) -> Result<ServerMessage, McpError>;

    async fn send_notification(&self, notification: NotificationFromClient)
        -> Result<(), McpError>;

    /// Records the protocol version negotiated during the handshake.
    fn set_protocol_version(&self, _protocol_version: &str) {}

    fn is_closed(&self) -> bool;

    async fn close(&self) -> Result<(), McpError>;
}

#[async_trait]
/// Opens transports for endpoints. Swappable so tests can count and script
/// connection attempts.
pub trait TransportConnector: Send + Sync {
    async fn open(&self, endpoint: &Endpoint) -> Result<Arc<dyn McpTransport>, McpError>;
}

/// Connector that spawns real subprocesses and talks real HTTP.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConnector;

#[async_trait]
impl TransportConnector for DefaultConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Arc<dyn McpTransport>, McpError> {
        match endpoint {
            Endpoint::Stdio(stdio) => {
                let transport = stdio::StdioTransport::open(stdio).await?;
                Ok(transport as Arc<dyn McpTransport>)
            }
            Endpoint::StreamableHttp(http) => {
                let transport = streamable_http::StreamableHttpTransport::open(http)?;
                Ok(Arc::new(transport) as Arc<dyn McpTransport>)
            }
        }
    }
}

/// Returns true when a server reports the JSON-RPC method-not-found code.
pub fn is_method_not_found(message: &ServerMessage) -> bool {
    matches!(
        message,
        ServerMessage::Error(error) if error.error.code == MCP_METHOD_NOT_FOUND
    )
}
