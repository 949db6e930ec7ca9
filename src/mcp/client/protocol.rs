use crate::mcp::error::{McpError, RemoteError, RemoteErrorKind};
use rust_mcp_schema::schema_utils::ServerMessage;
use rust_mcp_schema::{InitializeResult, PaginatedRequestParams, RpcError, LATEST_PROTOCOL_VERSION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound on `nextCursor` pages followed for a single listing.
pub(crate) const MCP_MAX_LIST_PAGES: usize = 32;
/// JSON-RPC code servers use for unknown resource URIs.
pub(crate) const MCP_RESOURCE_NOT_FOUND: i64 = -32002;

/// Which request produced a JSON-RPC error; drives not-found classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestContext {
    Initialize,
    ListTools,
    CallTool,
    ListResources,
    ReadResource,
    Ping,
}

/// Tool metadata advertised by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Contents of a `resources/read` reply, passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContent {
    #[serde(default)]
    pub contents: Vec<Value>,
}

/// One page of a cursor-paginated listing.
#[derive(Debug)]
pub(crate) struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

pub(crate) fn requested_protocol_version(configured: Option<&str>) -> String {
    match configured {
        Some(version) if !version.trim().is_empty() => version.to_string(),
        _ => LATEST_PROTOCOL_VERSION.to_string(),
    }
}

pub(crate) fn paginated_params(cursor: Option<String>) -> Option<PaginatedRequestParams> {
    cursor.map(|cursor| PaginatedRequestParams {
        cursor: Some(cursor),
        meta: None,
    })
}

pub(crate) fn parse_initialize_result(
    message: ServerMessage,
) -> Result<InitializeResult, McpError> {
    let value = parse_response_value(message, RequestContext::Initialize)?;
    let result = serde_json::from_value::<InitializeResult>(value)
        .map_err(|err| McpError::Protocol(format!("Invalid initialize response: {err}")))?;
    if result.protocol_version.trim().is_empty() {
        return Err(McpError::Protocol(
            "Unexpected initialize response.".to_string(),
        ));
    }
    Ok(result)
}

pub(crate) fn parse_page<T: DeserializeOwned>(
    message: ServerMessage,
    context: RequestContext,
    field: &str,
) -> Result<Page<T>, McpError> {
    let value = parse_response_value(message, context)?;
    let items = match value.get(field) {
        Some(items) => serde_json::from_value::<Vec<T>>(items.clone())
            .map_err(|err| McpError::Protocol(format!("Invalid {field} listing: {err}")))?,
        None => {
            return Err(McpError::Protocol(format!(
                "Listing response is missing '{field}'."
            )))
        }
    };
    let next_cursor = value
        .get("nextCursor")
        .and_then(|cursor| cursor.as_str())
        .filter(|cursor| !cursor.is_empty())
        .map(str::to_string);
    Ok(Page { items, next_cursor })
}

pub(crate) fn parse_read_resource(message: ServerMessage) -> Result<ResourceContent, McpError> {
    let value = parse_response_value(message, RequestContext::ReadResource)?;
    serde_json::from_value::<ResourceContent>(value)
        .map_err(|err| McpError::Protocol(format!("Invalid resources/read response: {err}")))
}

pub(crate) fn parse_response_value(
    message: ServerMessage,
    context: RequestContext,
) -> Result<Value, McpError> {
    match message {
        ServerMessage::Response(response) => serde_json::to_value(&response.result)
            .map_err(|err| McpError::Protocol(err.to_string())),
        ServerMessage::Error(error) => Err(classify_rpc_error(&error.error, context)),
        other => Err(McpError::Protocol(format_unexpected_server_message(&other))),
    }
}

/// Maps a JSON-RPC error onto the error taxonomy. Not-found sub-kinds are
/// recognized from the code or message the server chose, never validated
/// locally.
pub(crate) fn classify_rpc_error(error: &RpcError, context: RequestContext) -> McpError {
    let lowered = error.message.to_ascii_lowercase();
    let kind = match context {
        RequestContext::ReadResource
            if error.code == MCP_RESOURCE_NOT_FOUND || lowered.contains("not found") =>
        {
            RemoteErrorKind::ResourceNotFound
        }
        RequestContext::CallTool
            if lowered.contains("unknown tool") || lowered.contains("not found") =>
        {
            RemoteErrorKind::ToolNotFound
        }
        _ => RemoteErrorKind::Other,
    };
    McpError::Remote(RemoteError {
        kind,
        code: error.code,
        message: format_rpc_error(error),
    })
}

pub(crate) fn format_rpc_error(error: &RpcError) -> String {
    let mut output = error.message.clone();
    if let Some(data) = &error.data {
        let details = data
            .get("details")
            .and_then(|value| value.as_str())
            .map(|value| value.to_string())
            .or_else(|| data.as_str().map(|value| value.to_string()))
            .or_else(|| serde_json::to_string(data).ok());

        if let Some(details) = details {
            if !details.is_empty() && details != "null" {
                output.push_str(" (");
                output.push_str(&details);
                output.push(')');
            }
        }
    }
    output
}

pub(crate) fn format_unexpected_server_message(message: &ServerMessage) -> String {
    format!("Unexpected MCP server message: {message:?}")
}
