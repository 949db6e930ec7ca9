//! The closed set of verbs accepted by `POST /api/mcp/{server}`.

use crate::api::error::ApiError;
use crate::mcp::error::McpError;
use crate::mcp::facade::{BrowserFacade, DatabaseFacade, FacadeKind};
use crate::mcp::registry::ServerEntry;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum McpAction {
    ListTools,
    CallTool {
        name: String,
        arguments: Option<Map<String, Value>>,
    },
    ListResources,
    ReadResource {
        uri: String,
    },
    Ping,
    Navigate {
        url: String,
        instruction: Option<String>,
    },
    Act {
        action: String,
    },
    Extract {
        instruction: String,
    },
    Observe {
        instruction: String,
    },
    Screenshot,
    ExecuteSql {
        query: String,
    },
    ListTables {
        schemas: Option<Vec<String>>,
    },
    ListMigrations,
}

impl McpAction {
    pub fn parse(action: &str, params: &Value) -> Result<Self, ApiError> {
        let action = match action {
            "listTools" => McpAction::ListTools,
            "callTool" => McpAction::CallTool {
                name: required_str(params, &["name", "toolName"])?,
                arguments: optional_object(params, "arguments")?,
            },
            "listResources" => McpAction::ListResources,
            "readResource" => McpAction::ReadResource {
                uri: required_str(params, &["uri"])?,
            },
            "ping" => McpAction::Ping,
            "navigate" => McpAction::Navigate {
                url: required_str(params, &["url"])?,
                instruction: optional_str(params, "instruction"),
            },
            "act" => McpAction::Act {
                action: required_str(params, &["action"])?,
            },
            "extract" => McpAction::Extract {
                instruction: required_str(params, &["instruction"])?,
            },
            "observe" => McpAction::Observe {
                instruction: required_str(params, &["instruction"])?,
            },
            "screenshot" => McpAction::Screenshot,
            "executeSql" => McpAction::ExecuteSql {
                query: required_str(params, &["query"])?,
            },
            "listTables" => McpAction::ListTables {
                schemas: optional_strings(params, "schemas")?,
            },
            "listMigrations" => McpAction::ListMigrations,
            other => return Err(ApiError::BadRequest(format!("Unknown action: {other}"))),
        };
        Ok(action)
    }

    /// The façade a verb belongs to; generic capability calls have none.
    pub fn facade(&self) -> Option<FacadeKind> {
        match self {
            McpAction::Navigate { .. }
            | McpAction::Act { .. }
            | McpAction::Extract { .. }
            | McpAction::Observe { .. }
            | McpAction::Screenshot => Some(FacadeKind::Browser),
            McpAction::ExecuteSql { .. }
            | McpAction::ListTables { .. }
            | McpAction::ListMigrations => Some(FacadeKind::Database),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            McpAction::ListTools => "listTools",
            McpAction::CallTool { .. } => "callTool",
            McpAction::ListResources => "listResources",
            McpAction::ReadResource { .. } => "readResource",
            McpAction::Ping => "ping",
            McpAction::Navigate { .. } => "navigate",
            McpAction::Act { .. } => "act",
            McpAction::Extract { .. } => "extract",
            McpAction::Observe { .. } => "observe",
            McpAction::Screenshot => "screenshot",
            McpAction::ExecuteSql { .. } => "executeSql",
            McpAction::ListTables { .. } => "listTables",
            McpAction::ListMigrations => "listMigrations",
        }
    }

    pub async fn execute(self, entry: &ServerEntry, identity: &str) -> Result<Value, McpError> {
        let client = entry.manager.client(identity);
        match self {
            McpAction::ListTools => to_json(client.list_tools().await?),
            McpAction::CallTool { name, arguments } => client.call_tool(&name, arguments).await,
            McpAction::ListResources => to_json(client.list_resources().await?),
            McpAction::ReadResource { uri } => to_json(client.read_resource(&uri).await?),
            McpAction::Ping => {
                client.ping().await?;
                Ok(Value::Bool(true))
            }
            McpAction::Navigate { url, instruction } => {
                BrowserFacade::new(client)
                    .navigate(&url, instruction.as_deref())
                    .await
            }
            McpAction::Act { action } => BrowserFacade::new(client).act(&action).await,
            McpAction::Extract { instruction } => {
                BrowserFacade::new(client).extract(&instruction).await
            }
            McpAction::Observe { instruction } => {
                BrowserFacade::new(client).observe(&instruction).await
            }
            McpAction::Screenshot => BrowserFacade::new(client).screenshot().await,
            McpAction::ExecuteSql { query } => {
                DatabaseFacade::new(client, entry.project_id.clone())
                    .execute_sql(&query)
                    .await
            }
            McpAction::ListTables { schemas } => {
                DatabaseFacade::new(client, entry.project_id.clone())
                    .list_tables(schemas)
                    .await
            }
            McpAction::ListMigrations => {
                DatabaseFacade::new(client, entry.project_id.clone())
                    .list_migrations()
                    .await
            }
        }
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value, McpError> {
    serde_json::to_value(value).map_err(|err| McpError::Protocol(err.to_string()))
}

/// First present string among `names`; the error names the first alias.
/// Blank strings pass through so the session layer can reject them.
fn required_str(params: &Value, names: &[&str]) -> Result<String, ApiError> {
    names
        .iter()
        .find_map(|name| params.get(*name).and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| ApiError::missing_field(names.first().copied().unwrap_or("params")))
}

fn optional_str(params: &Value, name: &str) -> Option<String> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn optional_object(params: &Value, name: &str) -> Result<Option<Map<String, Value>>, ApiError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(_) => Err(ApiError::BadRequest(format!("Field '{name}' must be an object"))),
    }
}

fn optional_strings(params: &Value, name: &str) -> Result<Option<Vec<String>>, ApiError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    ApiError::BadRequest(format!("Field '{name}' must be a list of strings"))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(ApiError::BadRequest(format!(
            "Field '{name}' must be a list of strings"
        ))),
    }
}
