//! Scripted in-process MCP server used by session and manager tests.

use crate::mcp::error::McpError;
use crate::mcp::transport::{Endpoint, McpTransport, TransportConnector};
use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{NotificationFromClient, RequestFromClient, ServerMessage};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Tool name the mock server never answers promptly.
pub(crate) const SLOW_TOOL: &str = "slow";

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn server_message(value: Value) -> ServerMessage {
    serde_json::from_value(value).expect("mock server message should parse")
}

fn result(value: Value) -> ServerMessage {
    server_message(json!({"jsonrpc": "2.0", "id": 0, "result": value}))
}

fn error(code: i64, message: &str) -> ServerMessage {
    server_message(json!({
        "jsonrpc": "2.0",
        "id": 0,
        "error": {"code": code, "message": message}
    }))
}

/// Behaviour and counters shared by every transport a [`MockConnector`] opens.
pub(crate) struct MockServer {
    pub opens: AtomicUsize,
    pub initializes: AtomicUsize,
    pub closes: AtomicUsize,
    pub requests: AtomicUsize,
    pub fail_opens: AtomicUsize,
    pub fail_close: AtomicBool,
    pub reject_initialize: AtomicBool,
    pub open_delay: Mutex<Duration>,
    pub tools: Mutex<Vec<Value>>,
    pub tool_page_size: Mutex<Option<usize>>,
    pub resources: Mutex<Vec<Value>>,
    pub contents: Mutex<HashMap<String, Value>>,
    pub tool_calls: Mutex<Vec<(String, Value)>>,
    pub endpoints: Mutex<Vec<Endpoint>>,
}

impl Default for MockServer {
    fn default() -> Self {
        Self {
            opens: AtomicUsize::new(0),
            initializes: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
            fail_opens: AtomicUsize::new(0),
            fail_close: AtomicBool::new(false),
            reject_initialize: AtomicBool::new(false),
            open_delay: Mutex::new(Duration::from_millis(20)),
            tools: Mutex::new(vec![
                json!({"name": "navigate", "description": "Open a page", "inputSchema": {"type": "object"}}),
                json!({"name": "act", "description": "Perform an action", "inputSchema": {"type": "object"}}),
                json!({"name": SLOW_TOOL, "inputSchema": {"type": "object"}}),
            ]),
            tool_page_size: Mutex::new(None),
            resources: Mutex::new(vec![json!({
                "uri": "file:///notes.txt",
                "name": "notes",
                "mimeType": "text/plain"
            })]),
            contents: Mutex::new(HashMap::from([(
                "file:///notes.txt".to_string(),
                json!({"uri": "file:///notes.txt", "mimeType": "text/plain", "text": "hello"}),
            )])),
            tool_calls: Mutex::new(Vec::new()),
            endpoints: Mutex::new(Vec::new()),
        }
    }
}

impl MockServer {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn initializes(&self) -> usize {
        self.initializes.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Every request sent over any transport, handshake included.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn tool_names(&self) -> Vec<String> {
        lock(&self.tools)
            .iter()
            .filter_map(|tool| tool.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    pub fn tool_calls(&self) -> Vec<(String, Value)> {
        lock(&self.tool_calls).clone()
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        lock(&self.endpoints).clone()
    }

    fn initialize_result(&self) -> ServerMessage {
        result(json!({
            "protocolVersion": "2025-11-25",
            "capabilities": {"tools": {}, "resources": {}},
            "serverInfo": {"name": "mock", "version": "0.1.0"}
        }))
    }

    fn list_tools(&self, cursor: Option<String>) -> ServerMessage {
        let tools = lock(&self.tools).clone();
        let Some(page_size) = *lock(&self.tool_page_size) else {
            return result(json!({"tools": tools}));
        };
        let start = cursor
            .and_then(|cursor| cursor.parse::<usize>().ok())
            .unwrap_or(0);
        let end = (start + page_size).min(tools.len());
        let mut body = json!({"tools": tools[start..end].to_vec()});
        if end < tools.len() {
            body["nextCursor"] = Value::from(end.to_string());
        }
        result(body)
    }

    async fn call_tool(&self, name: String, arguments: Value) -> ServerMessage {
        lock(&self.tool_calls).push((name.clone(), arguments.clone()));
        if name == SLOW_TOOL {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if !self.tool_names().contains(&name) {
            return error(-32602, &format!("Unknown tool: {name}"));
        }
        result(json!({
            "content": [{"type": "text", "text": format!("{name} {arguments}")}],
            "isError": false
        }))
    }

    fn read_resource(&self, uri: &str) -> ServerMessage {
        match lock(&self.contents).get(uri) {
            Some(content) => result(json!({"contents": [content.clone()]})),
            None => error(-32002, &format!("Resource not found: {uri}")),
        }
    }
}

pub(crate) struct MockTransport {
    server: Arc<MockServer>,
    closed: AtomicBool,
    fail_close: bool,
}

impl MockTransport {
    /// Simulates the remote side going away.
    pub fn terminate(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl McpTransport for MockTransport {
    async fn send_request(&self, request: RequestFromClient) -> Result<ServerMessage, McpError> {
        if self.is_closed() {
            return Err(McpError::TransportUnavailable(
                "mock transport closed".to_string(),
            ));
        }
        self.server.requests.fetch_add(1, Ordering::SeqCst);
        let message = match request {
            RequestFromClient::InitializeRequest(_) => {
                self.server.initializes.fetch_add(1, Ordering::SeqCst);
                if self.server.reject_initialize.load(Ordering::SeqCst) {
                    error(-32600, "Unsupported client")
                } else {
                    self.server.initialize_result()
                }
            }
            RequestFromClient::ListToolsRequest(params) => {
                self.server.list_tools(params.and_then(|params| params.cursor))
            }
            RequestFromClient::CallToolRequest(params) => {
                let arguments = params
                    .arguments
                    .map(Value::Object)
                    .unwrap_or(Value::Null);
                self.server.call_tool(params.name, arguments).await
            }
            RequestFromClient::ListResourcesRequest(_) => {
                result(json!({"resources": lock(&self.server.resources).clone()}))
            }
            RequestFromClient::ReadResourceRequest(params) => {
                self.server.read_resource(&params.uri)
            }
            RequestFromClient::PingRequest(_) => result(json!({})),
            _ => error(-32601, "Method not found"),
        };
        Ok(message)
    }

    async fn send_notification(
        &self,
        _notification: NotificationFromClient,
    ) -> Result<(), McpError> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), McpError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.server.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(McpError::TransportUnavailable(
                "mock close failed".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connector that hands out [`MockTransport`]s and records each `open`.
#[derive(Default)]
pub(crate) struct MockConnector {
    pub server: Arc<MockServer>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transports(&self) -> Vec<Arc<MockTransport>> {
        lock(&self.transports).clone()
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Arc<dyn McpTransport>, McpError> {
        self.server.opens.fetch_add(1, Ordering::SeqCst);
        lock(&self.server.endpoints).push(endpoint.clone());
        let delay = *lock(&self.server.open_delay);
        tokio::time::sleep(delay).await;

        let fail = self
            .server
            .fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if fail {
            return Err(McpError::TransportUnavailable(
                "mock spawn failed".to_string(),
            ));
        }

        let transport = Arc::new(MockTransport {
            server: Arc::clone(&self.server),
            closed: AtomicBool::new(false),
            fail_close: self.server.fail_close.load(Ordering::SeqCst),
        });
        lock(&self.transports).push(Arc::clone(&transport));
        Ok(transport as Arc<dyn McpTransport>)
    }
}
