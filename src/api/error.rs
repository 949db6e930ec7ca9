//! Maps session-layer failures onto HTTP responses.

use crate::mcp::error::McpError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum ApiError {
    /// Credentials are absent; the body names them.
    NotConfigured {
        message: String,
        missing: Vec<String>,
        hint: String,
    },
    BadRequest(String),
    NotFound(String),
    Timeout(String),
    Internal {
        message: String,
        kind: &'static str,
        trace: Option<String>,
    },
}

impl ApiError {
    pub fn missing_field(field: &str) -> Self {
        ApiError::BadRequest(format!("Missing required field: {field}"))
    }

    /// `production` drops the debug trace from internal errors.
    pub fn from_mcp(err: McpError, production: bool) -> Self {
        match err {
            McpError::NotConfigured {
                ref server_id,
                ref missing,
            } => {
                let hint = if missing.is_empty() {
                    format!("Check the [servers.{server_id}] profile in the configuration file")
                } else {
                    format!("Set {} and restart the relay", missing.join(", "))
                };
                ApiError::NotConfigured {
                    message: err.to_string(),
                    missing: missing.clone(),
                    hint,
                }
            }
            McpError::InvalidInput(message) => ApiError::BadRequest(message),
            McpError::Timeout(_) => ApiError::Timeout(err.to_string()),
            other => ApiError::Internal {
                message: other.to_string(),
                kind: other.kind(),
                trace: (!production).then(|| format!("{other:?}")),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotConfigured { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::NotConfigured { message, .. } | ApiError::Internal { message, .. } => {
                write!(f, "{message}")
            }
            ApiError::BadRequest(message)
            | ApiError::NotFound(message)
            | ApiError::Timeout(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::NotConfigured {
                message,
                missing,
                hint,
            } => json!({ "error": message, "missing": missing, "hint": hint }),
            ApiError::BadRequest(message)
            | ApiError::NotFound(message)
            | ApiError::Timeout(message) => json!({ "error": message }),
            ApiError::Internal {
                message,
                kind,
                trace,
            } => {
                let mut body = json!({ "error": message, "kind": kind });
                if let Some(trace) = trace {
                    body["trace"] = trace.into();
                }
                body
            }
        };

        (status, Json(body)).into_response()
    }
}
