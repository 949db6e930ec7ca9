//! Domain verbs mapped onto `tools/call` for well-known server families.
//!
//! Façades hold no state of their own and add no retries; every error from
//! the underlying call propagates unchanged.

use crate::mcp::error::McpError;
use crate::mcp::manager::SessionClient;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacadeKind {
    Browser,
    Database,
}

impl FacadeKind {
    pub fn parse(facade: &str) -> Result<Self, String> {
        match facade.to_ascii_lowercase().as_str() {
            "browser" => Ok(FacadeKind::Browser),
            "database" => Ok(FacadeKind::Database),
            other => Err(format!("Unsupported facade: {}", other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FacadeKind::Browser => "browser",
            FacadeKind::Database => "database",
        }
    }
}

fn arguments<const N: usize>(pairs: [(&str, Option<Value>); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .filter_map(|(key, value)| value.map(|value| (key.to_string(), value)))
        .collect()
}

/// Browser automation verbs.
pub struct BrowserFacade<'a> {
    client: SessionClient<'a>,
}

impl<'a> BrowserFacade<'a> {
    pub const NAVIGATE_TOOL: &'static str = "navigate";
    pub const ACT_TOOL: &'static str = "act";
    pub const EXTRACT_TOOL: &'static str = "extract";
    pub const OBSERVE_TOOL: &'static str = "observe";
    pub const SCREENSHOT_TOOL: &'static str = "screenshot";

    pub fn new(client: SessionClient<'a>) -> Self {
        Self { client }
    }

    /// Opens `url`, optionally performing `instruction` once loaded.
    pub async fn navigate(&self, url: &str, instruction: Option<&str>) -> Result<Value, McpError> {
        let args = arguments([
            ("url", Some(Value::from(url))),
            ("instruction", instruction.map(Value::from)),
        ]);
        self.client.call_tool(Self::NAVIGATE_TOOL, Some(args)).await
    }

    pub async fn act(&self, action: &str) -> Result<Value, McpError> {
        let args = arguments([("action", Some(Value::from(action)))]);
        self.client.call_tool(Self::ACT_TOOL, Some(args)).await
    }

    pub async fn extract(&self, instruction: &str) -> Result<Value, McpError> {
        let args = arguments([("instruction", Some(Value::from(instruction)))]);
        self.client.call_tool(Self::EXTRACT_TOOL, Some(args)).await
    }

    pub async fn observe(&self, instruction: &str) -> Result<Value, McpError> {
        let args = arguments([("instruction", Some(Value::from(instruction)))]);
        self.client.call_tool(Self::OBSERVE_TOOL, Some(args)).await
    }

    pub async fn screenshot(&self) -> Result<Value, McpError> {
        self.client
            .call_tool(Self::SCREENSHOT_TOOL, Some(Map::new()))
            .await
    }
}

/// Read-only database inspection verbs. `project_id` is injected into every
/// call when the profile supplies one.
pub struct DatabaseFacade<'a> {
    client: SessionClient<'a>,
    project_id: Option<String>,
}

impl<'a> DatabaseFacade<'a> {
    pub const EXECUTE_SQL_TOOL: &'static str = "execute_sql";
    pub const LIST_TABLES_TOOL: &'static str = "list_tables";
    pub const LIST_MIGRATIONS_TOOL: &'static str = "list_migrations";

    pub fn new(client: SessionClient<'a>, project_id: Option<String>) -> Self {
        Self { client, project_id }
    }

    fn project(&self) -> Option<Value> {
        self.project_id.as_deref().map(Value::from)
    }

    pub async fn execute_sql(&self, query: &str) -> Result<Value, McpError> {
        let args = arguments([
            ("project_id", self.project()),
            ("query", Some(Value::from(query))),
        ]);
        self.client
            .call_tool(Self::EXECUTE_SQL_TOOL, Some(args))
            .await
    }

    pub async fn list_tables(&self, schemas: Option<Vec<String>>) -> Result<Value, McpError> {
        let args = arguments([
            ("project_id", self.project()),
            ("schemas", schemas.map(Value::from)),
        ]);
        self.client
            .call_tool(Self::LIST_TABLES_TOOL, Some(args))
            .await
    }

    pub async fn list_migrations(&self) -> Result<Value, McpError> {
        let args = arguments([("project_id", self.project())]);
        self.client
            .call_tool(Self::LIST_MIGRATIONS_TOOL, Some(args))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::manager::{EndpointSource, ManagerSettings, SessionManager, GLOBAL_IDENTITY};
    use crate::mcp::testing::MockConnector;
    use crate::mcp::transport::{Endpoint, StdioEndpoint, TransportConnector};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn manager(connector: &Arc<MockConnector>) -> SessionManager {
        SessionManager::new(
            ManagerSettings::new("browser"),
            EndpointSource::Static(Endpoint::Stdio(StdioEndpoint {
                command: "npx".to_string(),
                args: vec!["@browserbasehq/mcp".to_string()],
                env: BTreeMap::new(),
                stderr_patterns: vec!["error".to_string()],
            })),
            Arc::clone(connector) as Arc<dyn TransportConnector>,
        )
    }

    #[tokio::test]
    async fn navigate_maps_to_tool_call_with_optional_instruction() {
        let connector = MockConnector::new();
        let manager = manager(&connector);
        let browser = BrowserFacade::new(manager.client(GLOBAL_IDENTITY));

        browser
            .navigate("https://example.com", Some("click login"))
            .await
            .expect("navigate should succeed");
        browser
            .navigate("https://example.org", None)
            .await
            .expect("navigate should succeed");

        let calls = connector.server.tool_calls();
        assert_eq!(calls[0].0, "navigate");
        assert_eq!(
            calls[0].1,
            json!({"url": "https://example.com", "instruction": "click login"})
        );
        assert_eq!(calls[1].1, json!({"url": "https://example.org"}));
    }

    #[tokio::test]
    async fn facade_errors_propagate_unchanged() {
        let connector = MockConnector::new();
        let manager = manager(&connector);
        let browser = BrowserFacade::new(manager.client(GLOBAL_IDENTITY));

        let err = browser
            .extract("all prices")
            .await
            .expect_err("unknown tool should fail");
        assert!(err.is_tool_not_found());
    }

    #[tokio::test]
    async fn database_calls_carry_project_id() {
        let connector = MockConnector::new();
        {
            let mut tools = connector.server.tools.lock().expect("lock");
            for name in ["execute_sql", "list_tables", "list_migrations"] {
                tools.push(json!({"name": name, "inputSchema": {"type": "object"}}));
            }
        }
        let manager = manager(&connector);
        let database =
            DatabaseFacade::new(manager.client(GLOBAL_IDENTITY), Some("proj-1".to_string()));

        database
            .execute_sql("select 1")
            .await
            .expect("query should succeed");
        database
            .list_tables(Some(vec!["public".to_string()]))
            .await
            .expect("tables should list");
        database
            .list_migrations()
            .await
            .expect("migrations should list");

        let calls = connector.server.tool_calls();
        assert_eq!(
            calls[0],
            (
                "execute_sql".to_string(),
                json!({"project_id": "proj-1", "query": "select 1"})
            )
        );
        assert_eq!(
            calls[1].1,
            json!({"project_id": "proj-1", "schemas": ["public"]})
        );
        assert_eq!(calls[2].1, json!({"project_id": "proj-1"}));
    }

    #[test]
    fn facade_kind_parses_case_insensitively() {
        assert_eq!(FacadeKind::parse("Browser"), Ok(FacadeKind::Browser));
        assert_eq!(FacadeKind::parse("database"), Ok(FacadeKind::Database));
        assert!(FacadeKind::parse("email").is_err());
    }
}
