//! Route handlers for the relay surface.

use crate::api::actions::McpAction;
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::mcp::client::SessionInfo;
use crate::mcp::error::McpError;
use crate::mcp::manager::SessionScope;
use crate::mcp::registry::ServerEntry;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default, Deserialize)]
pub struct ActionRequest {
    pub action: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IdentityQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub action: &'static str,
    pub data: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub server: String,
    pub display_name: String,
    pub configured: bool,
    pub missing: Vec<String>,
    pub scope: SessionScope,
    pub facade: Option<&'static str>,
    /// `None` when no liveness check ran.
    pub connected: Option<bool>,
    pub tool_count: Option<usize>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionInfo>,
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub server: String,
    pub identity: String,
    pub disconnected: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub servers: Vec<ServerHealth>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHealth {
    pub id: String,
    pub display_name: String,
    pub configured: bool,
    pub scope: SessionScope,
    pub facade: Option<&'static str>,
    pub sessions: usize,
}

fn find_server(state: &AppState, server: &str) -> Result<Arc<ServerEntry>, ApiError> {
    state
        .registry
        .find_server(server)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown MCP server: {server}")))
}

fn requested_identity(user_id: Option<&str>) -> Option<&str> {
    user_id.map(str::trim).filter(|id| !id.is_empty())
}

fn resolve_identity(entry: &ServerEntry, user_id: Option<&str>) -> Result<String, ApiError> {
    entry
        .manager
        .resolve_identity(requested_identity(user_id))
        .map_err(|_| ApiError::missing_field("userId"))
}

/// POST /api/mcp/:server
pub async fn post_action(
    State(state): State<AppState>,
    Path(server): Path<String>,
    payload: Result<Json<ActionRequest>, JsonRejection>,
) -> Result<Json<ActionResponse>, ApiError> {
    let entry = find_server(&state, &server)?;
    if !entry.manager.is_configured() {
        return Err(ApiError::from_mcp(
            McpError::not_configured(&entry.id, entry.manager.missing_credentials()),
            state.production,
        ));
    }
    let Json(request) = payload.map_err(|rejection| {
        ApiError::BadRequest(format!("Invalid request body: {}", rejection.body_text()))
    })?;

    let action_name = request
        .action
        .as_deref()
        .ok_or_else(|| ApiError::missing_field("action"))?;
    let action = McpAction::parse(action_name, &request.params)?;
    if let Some(required) = action.facade() {
        if entry.facade != Some(required) {
            return Err(ApiError::BadRequest(format!(
                "Action '{}' requires a {} server; '{}' is not one",
                action.name(),
                required.as_str(),
                entry.id
            )));
        }
    }
    let identity = resolve_identity(&entry, request.user_id.as_deref())?;

    let name = action.name();
    debug!(server_id = %entry.id, identity = %identity, action = name, "Dispatching MCP action");
    let data = action
        .execute(&entry, &identity)
        .await
        .map_err(|err| ApiError::from_mcp(err, state.production))?;

    Ok(Json(ActionResponse {
        success: true,
        action: name,
        data,
    }))
}

/// GET /api/mcp/:server
pub async fn get_status(
    State(state): State<AppState>,
    Path(server): Path<String>,
    Query(query): Query<IdentityQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let entry = find_server(&state, &server)?;
    let configured = entry.manager.is_configured();
    let mut status = StatusResponse {
        server: entry.id.clone(),
        display_name: entry.display_name.clone(),
        configured,
        missing: entry.manager.missing_credentials().to_vec(),
        scope: entry.manager.scope(),
        facade: entry.facade.map(|facade| facade.as_str()),
        connected: None,
        tool_count: None,
        error: None,
        session: None,
    };
    if !configured {
        return Ok(Json(status));
    }

    let identity = match entry
        .manager
        .resolve_identity(requested_identity(query.user_id.as_deref()))
    {
        Ok(identity) => identity,
        Err(_) => return Ok(Json(status)),
    };

    match entry.manager.client(&identity).list_tools().await {
        Ok(tools) => {
            status.connected = Some(true);
            status.tool_count = Some(tools.len());
        }
        Err(err) => {
            status.connected = Some(false);
            status.error = Some(err.to_string());
        }
    }
    status.session = entry.manager.session_info(&identity).await;
    Ok(Json(status))
}

/// DELETE /api/mcp/:server
pub async fn delete_session(
    State(state): State<AppState>,
    Path(server): Path<String>,
    Query(query): Query<IdentityQuery>,
) -> Result<Json<DisconnectResponse>, ApiError> {
    let entry = find_server(&state, &server)?;
    let identity = resolve_identity(&entry, query.user_id.as_deref())?;
    entry
        .manager
        .disconnect(&identity)
        .await
        .map_err(|err| ApiError::from_mcp(err, state.production))?;
    info!(server_id = %entry.id, identity = %identity, "Session evicted on request");

    Ok(Json(DisconnectResponse {
        server: entry.id.clone(),
        identity,
        disconnected: true,
    }))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut servers = Vec::new();
    for entry in state.registry.servers() {
        servers.push(ServerHealth {
            id: entry.id.clone(),
            display_name: entry.display_name.clone(),
            configured: entry.manager.is_configured(),
            scope: entry.manager.scope(),
            facade: entry.facade.map(|facade| facade.as_str()),
            sessions: entry.manager.identities().await.len(),
        });
    }

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        servers,
    })
}
