//! Streamable HTTP transport: JSON-RPC over POST with JSON or SSE replies.

use super::{HttpEndpoint, McpTransport};
use crate::mcp::error::McpError;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::RequestId;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tracing::debug;

pub const MCP_JSON_CONTENT_TYPE: &str = "application/json";
pub const MCP_JSON_AND_SSE_ACCEPT: &str = "application/json, text/event-stream";
pub const MCP_PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

const MCP_HTTP_CONNECT_TIMEOUT_SECONDS: u64 = 10;
const MCP_HTTP_REQUEST_TIMEOUT_SECONDS: u64 = 300;
const MCP_HTTP_POOL_IDLE_TIMEOUT_SECONDS: u64 = 90;
const MCP_HTTP_POOL_MAX_IDLE_PER_HOST: usize = 8;

pub fn build_mcp_http_client() -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(MCP_HTTP_CONNECT_TIMEOUT_SECONDS))
        .timeout(Duration::from_secs(MCP_HTTP_REQUEST_TIMEOUT_SECONDS))
        .pool_idle_timeout(Duration::from_secs(MCP_HTTP_POOL_IDLE_TIMEOUT_SECONDS))
        .pool_max_idle_per_host(MCP_HTTP_POOL_MAX_IDLE_PER_HOST)
        .build()
        .map_err(|err| err.to_string())
}

pub fn apply_streamable_http_client_post_headers(
    request: reqwest::RequestBuilder,
) -> reqwest::RequestBuilder {
    request
        .header("Content-Type", MCP_JSON_CONTENT_TYPE)
        .header("Accept", MCP_JSON_AND_SSE_ACCEPT)
}

pub fn apply_streamable_http_protocol_version_header(
    request: reqwest::RequestBuilder,
    protocol_version: Option<&str>,
) -> reqwest::RequestBuilder {
    match protocol_version {
        Some(protocol_version) if !protocol_version.trim().is_empty() => {
            request.header(MCP_PROTOCOL_VERSION_HEADER, protocol_version)
        }
        _ => request,
    }
}

pub struct StreamableHttpTransport {
    client: reqwest::Client,
    endpoint: HttpEndpoint,
    session_id: StdMutex<Option<String>>,
    protocol_version: StdMutex<Option<String>>,
    next_request_id: AtomicI64,
    closed: AtomicBool,
}

impl StreamableHttpTransport {
    /// Prepares a client for the endpoint. Streamable HTTP has no separate
    /// connect step; reachability is established by the first POST, which is
    /// the `initialize` request of the handshake.
    pub fn open(endpoint: &HttpEndpoint) -> Result<Self, McpError> {
        if endpoint.url.trim().is_empty() {
            return Err(McpError::TransportUnavailable(
                "MCP base_url is required for HTTP transports.".to_string(),
            ));
        }
        reqwest::Url::parse(&endpoint.url).map_err(|err| {
            McpError::TransportUnavailable(format!("Invalid MCP URL {}: {err}", endpoint.url))
        })?;
        let client = build_mcp_http_client().map_err(|err| {
            McpError::TransportUnavailable(format!("Failed to build HTTP client: {err}"))
        })?;
        Ok(Self {
            client,
            endpoint: endpoint.clone(),
            session_id: StdMutex::new(None),
            protocol_version: StdMutex::new(None),
            next_request_id: AtomicI64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_session_id(&self, session_id: Option<String>) {
        if let Some(session_id) = session_id {
            *self
                .session_id
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(session_id);
        }
    }

    fn protocol_version(&self) -> Option<String> {
        self.protocol_version
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::SeqCst))
    }

    fn decorate(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut request = apply_streamable_http_protocol_version_header(
            request,
            self.protocol_version().as_deref(),
        );
        for (name, value) in &self.endpoint.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(auth) = self.endpoint.auth_header() {
            request = request.header("Authorization", auth);
        }
        if let Some(session_id) = self.session_id() {
            request = request.header(MCP_SESSION_ID_HEADER, session_id);
        }
        request
    }

    fn ensure_open(&self) -> Result<(), McpError> {
        if self.is_closed() {
            return Err(McpError::TransportUnavailable(format!(
                "MCP HTTP session with {} is closed.",
                self.endpoint.url
            )));
        }
        Ok(())
    }

    fn map_send_error(&self, err: reqwest::Error) -> McpError {
        if err.is_timeout() {
            return McpError::Timeout(Duration::from_secs(MCP_HTTP_REQUEST_TIMEOUT_SECONDS));
        }
        if err.is_connect() {
            self.closed.store(true, Ordering::SeqCst);
        }
        McpError::TransportUnavailable(err.to_string())
    }

    /// Classifies a non-success status. Auth failures and unknown sessions
    /// end the transport so the next caller re-handshakes with fresh
    /// credentials.
    fn map_status(&self, status: StatusCode) -> McpError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                self.closed.store(true, Ordering::SeqCst);
                McpError::TransportUnavailable(format!("HTTP error: {}", status))
            }
            status if status.is_server_error() => {
                McpError::TransportUnavailable(format!("HTTP error: {}", status))
            }
            status => McpError::Protocol(format!("HTTP error: {}", status)),
        }
    }

    async fn post(&self, message: &ClientMessage) -> Result<reqwest::Response, McpError> {
        self.ensure_open()?;
        let payload =
            serde_json::to_string(message).map_err(|err| McpError::Protocol(err.to_string()))?;
        debug!(url = %self.endpoint.url, "Sending MCP HTTP request");
        let request = self.decorate(apply_streamable_http_client_post_headers(
            self.client.post(&self.endpoint.url),
        ));
        let response = request
            .body(payload)
            .send()
            .await
            .map_err(|err| self.map_send_error(err))?;
        if !response.status().is_success() {
            return Err(self.map_status(response.status()));
        }
        self.set_session_id(header_value(&response, MCP_SESSION_ID_HEADER));
        Ok(response)
    }
}

fn header_value(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

#[async_trait]
impl McpTransport for StreamableHttpTransport {
    async fn send_request(&self, request: RequestFromClient) -> Result<ServerMessage, McpError> {
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(self.next_request_id()),
        )
        .map_err(|err| McpError::Protocol(err.to_string()))?;
        let response = self.post(&message).await?;
        let content_type = header_value(&response, reqwest::header::CONTENT_TYPE.as_str())
            .unwrap_or_default();

        if is_event_stream_content_type(&content_type) {
            next_sse_server_message(response).await
        } else {
            let body = response
                .bytes()
                .await
                .map_err(|err| McpError::TransportUnavailable(err.to_string()))?;
            serde_json::from_slice::<ServerMessage>(&body)
                .map_err(|err| McpError::Protocol(err.to_string()))
        }
    }

    async fn send_notification(
        &self,
        notification: NotificationFromClient,
    ) -> Result<(), McpError> {
        let message = ClientMessage::from_message(
            MessageFromClient::NotificationFromClient(notification),
            None,
        )
        .map_err(|err| McpError::Protocol(err.to_string()))?;
        self.post(&message).await.map(|_| ())
    }

    fn set_protocol_version(&self, protocol_version: &str) {
        *self
            .protocol_version
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(protocol_version.to_string());
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), McpError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(session_id) = self.session_id() else {
            return Ok(());
        };
        let request = apply_streamable_http_protocol_version_header(
            self.client
                .delete(&self.endpoint.url)
                .header(MCP_SESSION_ID_HEADER, session_id),
            self.protocol_version().as_deref(),
        );
        let request = match self.endpoint.auth_header() {
            Some(auth) => request.header("Authorization", auth),
            None => request,
        };
        // Servers may not support explicit termination; the session is
        // abandoned locally either way.
        match request.send().await {
            Ok(response) => {
                debug!(url = %self.endpoint.url, status = %response.status(), "Terminated MCP HTTP session")
            }
            Err(err) => {
                debug!(url = %self.endpoint.url, error = %err, "MCP HTTP session termination failed")
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        self.drain_lines(false)
    }

    pub fn finish(&mut self) -> Vec<String> {
        self.drain_lines(true)
    }

    fn drain_lines(&mut self, flush: bool) -> Vec<String> {
        let mut lines = Vec::new();
        let mut consumed = 0;

        while let Some(relative_pos) = self.buffer[consumed..].iter().position(|b| *b == b'\n') {
            let line_bytes = &self.buffer[consumed..consumed + relative_pos];
            push_trimmed_line(&mut lines, line_bytes);
            consumed += relative_pos + 1;
        }

        if flush {
            push_trimmed_line(&mut lines, &self.buffer[consumed..]);
            self.buffer.clear();
        } else if consumed > 0 {
            self.buffer.drain(..consumed);
        }

        lines
    }
}

fn push_trimmed_line(lines: &mut Vec<String>, bytes: &[u8]) {
    if let Ok(text) = std::str::from_utf8(bytes) {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }
}

pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}

pub fn sse_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

/// Reads an SSE response until the first JSON-RPC response or error arrives.
/// Interleaved server requests and notifications are skipped.
async fn next_sse_server_message(response: reqwest::Response) -> Result<ServerMessage, McpError> {
    let mut stream = response.bytes_stream();
    let mut buffer = SseLineBuffer::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| McpError::TransportUnavailable(err.to_string()))?;
        for line in buffer.push(&chunk) {
            if let Some(message) = decode_sse_line(&line)? {
                return Ok(message);
            }
        }
    }

    for line in buffer.finish() {
        if let Some(message) = decode_sse_line(&line)? {
            return Ok(message);
        }
    }

    Err(McpError::Protocol("Empty event-stream response.".to_string()))
}

fn decode_sse_line(line: &str) -> Result<Option<ServerMessage>, McpError> {
    let Some(payload) = sse_data_payload(line) else {
        return Ok(None);
    };
    if payload.is_empty() {
        return Ok(None);
    }

    let message = serde_json::from_str::<ServerMessage>(payload)
        .map_err(|err| McpError::Protocol(err.to_string()))?;
    match message {
        ServerMessage::Response(_) | ServerMessage::Error(_) => Ok(Some(message)),
        ServerMessage::Request(_) | ServerMessage::Notification(_) => {
            debug!("Skipping interleaved MCP server message on event stream");
            Ok(None)
        }
    }
}
