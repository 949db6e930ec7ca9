//! One handshake-established logical connection to a remote tool server.
//!
//! A [`Session`] owns its transport exclusively. It never reconnects on its
//! own: once the transport terminates the session reports
//! [`SessionState::Disconnected`] and the manager replaces it on the next
//! call.

use crate::mcp::error::McpError;
use crate::mcp::transport::{is_method_not_found, Endpoint, McpTransport, TransportConnector};
use chrono::{DateTime, Utc};
use rust_mcp_schema::schema_utils::{NotificationFromClient, RequestFromClient, ServerMessage};
use rust_mcp_schema::{
    CallToolRequestParams, ClientCapabilities, Implementation, InitializeRequestParams,
    InitializeResult, PaginatedRequestParams, ReadResourceRequestParams,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

mod protocol;

pub use protocol::{ResourceContent, ResourceDescriptor, ToolDescriptor};
use protocol::{
    paginated_params, parse_initialize_result, parse_page, parse_read_resource,
    parse_response_value, requested_protocol_version, RequestContext, MCP_MAX_LIST_PAGES,
};

/// Client identity announced during the `initialize` handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDetails {
    pub name: String,
    pub version: String,
    /// Requested protocol version; the latest known version when unset.
    pub protocol_version: Option<String>,
}

impl Default for ClientDetails {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: None,
        }
    }
}

impl ClientDetails {
    fn initialize_params(&self, protocol_version: String) -> InitializeRequestParams {
        InitializeRequestParams {
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: self.name.clone(),
                version: self.version.clone(),
                title: None,
                description: None,
                icons: Vec::new(),
                website_url: None,
            },
            meta: None,
            protocol_version,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Point-in-time description of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub server_id: String,
    pub identity: String,
    pub server_name: String,
    pub server_version: String,
    pub protocol_version: String,
    pub connected_at: DateTime<Utc>,
    pub state: SessionState,
}

pub struct Session {
    server_id: String,
    identity: String,
    endpoint: Endpoint,
    transport: Arc<dyn McpTransport>,
    server_details: InitializeResult,
    connected_at: DateTime<Utc>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("server_id", &self.server_id)
            .field("identity", &self.identity)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    /// Opens a transport for `endpoint` and runs the handshake, all within
    /// `connect_timeout`. The transport is released on every failure path.
    pub async fn connect(
        server_id: &str,
        identity: &str,
        endpoint: Endpoint,
        connector: &dyn TransportConnector,
        client: &ClientDetails,
        connect_timeout: Duration,
    ) -> Result<Self, McpError> {
        info!(
            server_id = %server_id,
            identity = %identity,
            transport = ?endpoint.kind(),
            target = %endpoint.describe(),
            "Connecting MCP session"
        );

        let transport = tokio::time::timeout(connect_timeout, connector.open(&endpoint))
            .await
            .map_err(|_| McpError::Timeout(connect_timeout))??;

        let handshake =
            tokio::time::timeout(connect_timeout, handshake(transport.as_ref(), client)).await;
        let server_details = match handshake {
            Ok(Ok(details)) => details,
            Ok(Err(err)) => {
                release_transport(server_id, transport.as_ref()).await;
                return Err(err);
            }
            Err(_) => {
                release_transport(server_id, transport.as_ref()).await;
                return Err(McpError::Timeout(connect_timeout));
            }
        };

        info!(
            server_id = %server_id,
            identity = %identity,
            server = %server_details.server_info.name,
            protocol_version = %server_details.protocol_version,
            "MCP session connected"
        );

        Ok(Self {
            server_id: server_id.to_string(),
            identity: identity.to_string(),
            endpoint,
            transport,
            server_details,
            connected_at: Utc::now(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn server_details(&self) -> &InitializeResult {
        &self.server_details
    }

    /// False once closed locally or once the transport reports termination.
    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.transport.is_closed()
    }

    pub fn state(&self) -> SessionState {
        if self.is_connected() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            server_id: self.server_id.clone(),
            identity: self.identity.clone(),
            server_name: self.server_details.server_info.name.clone(),
            server_version: self.server_details.server_info.version.clone(),
            protocol_version: self.server_details.protocol_version.clone(),
            connected_at: self.connected_at,
            state: self.state(),
        }
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        if self.server_details.capabilities.tools.is_none() {
            return Ok(Vec::new());
        }
        self.collect_pages(
            RequestContext::ListTools,
            "tools",
            RequestFromClient::ListToolsRequest,
        )
        .await
    }

    /// Invokes a tool and returns the server's result payload unchanged.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<Value, McpError> {
        if name.trim().is_empty() {
            return Err(McpError::InvalidInput(
                "tool name must not be empty".to_string(),
            ));
        }
        let mut params = CallToolRequestParams::new(name);
        if let Some(arguments) = arguments {
            params = params.with_arguments(arguments);
        }
        debug!(server_id = %self.server_id, identity = %self.identity, tool = %name, "Calling MCP tool");
        let response = self.send(RequestFromClient::CallToolRequest(params)).await?;
        parse_response_value(response, RequestContext::CallTool)
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, McpError> {
        if self.server_details.capabilities.resources.is_none() {
            return Ok(Vec::new());
        }
        self.collect_pages(
            RequestContext::ListResources,
            "resources",
            RequestFromClient::ListResourcesRequest,
        )
        .await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ResourceContent, McpError> {
        if uri.trim().is_empty() {
            return Err(McpError::InvalidInput(
                "resource uri must not be empty".to_string(),
            ));
        }
        let params = ReadResourceRequestParams {
            meta: None,
            uri: uri.to_string(),
        };
        let response = self
            .send(RequestFromClient::ReadResourceRequest(params))
            .await?;
        parse_read_resource(response)
    }

    pub async fn ping(&self) -> Result<(), McpError> {
        let response = self.send(RequestFromClient::PingRequest(None)).await?;
        parse_response_value(response, RequestContext::Ping).map(|_| ())
    }

    /// Tears down the transport. Repeated calls are no-ops.
    pub async fn close(&self) -> Result<(), McpError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(server_id = %self.server_id, identity = %self.identity, "Closing MCP session");
        self.transport.close().await
    }

    async fn send(&self, request: RequestFromClient) -> Result<ServerMessage, McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }
        self.transport.send_request(request).await
    }

    async fn collect_pages<T: DeserializeOwned>(
        &self,
        context: RequestContext,
        field: &str,
        build: fn(Option<PaginatedRequestParams>) -> RequestFromClient,
    ) -> Result<Vec<T>, McpError> {
        let mut items = Vec::new();
        let mut cursor = None;
        for _ in 0..MCP_MAX_LIST_PAGES {
            let response = self.send(build(paginated_params(cursor.take()))).await?;
            if is_method_not_found(&response) {
                debug!(server_id = %self.server_id, field, "MCP server does not support listing");
                return Ok(items);
            }
            let page = parse_page::<T>(response, context, field)?;
            items.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(items),
            }
        }
        warn!(
            server_id = %self.server_id,
            field,
            pages = MCP_MAX_LIST_PAGES,
            "Stopped following MCP listing cursor at page limit"
        );
        Ok(items)
    }
}

async fn handshake(
    transport: &dyn McpTransport,
    client: &ClientDetails,
) -> Result<InitializeResult, McpError> {
    let requested = requested_protocol_version(client.protocol_version.as_deref());
    transport.set_protocol_version(&requested);

    let response = transport
        .send_request(RequestFromClient::InitializeRequest(
            client.initialize_params(requested),
        ))
        .await?;
    let details = parse_initialize_result(response)?;
    transport.set_protocol_version(&details.protocol_version);

    transport
        .send_notification(NotificationFromClient::InitializedNotification(None))
        .await?;
    Ok(details)
}

async fn release_transport(server_id: &str, transport: &dyn McpTransport) {
    if let Err(err) = transport.close().await {
        warn!(server_id = %server_id, error = %err, "Failed to release MCP transport after handshake failure");
    }
}

#[cfg(test)]
mod tests;
