use super::*;
use crate::mcp::testing::{MockConnector, SLOW_TOOL};
use crate::mcp::transport::HttpEndpoint;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

fn endpoint() -> Endpoint {
    Endpoint::StreamableHttp(HttpEndpoint {
        url: "https://mcp.example.com/mcp".to_string(),
        headers: BTreeMap::new(),
        bearer_token: None,
    })
}

async fn connect(connector: &MockConnector) -> Result<Session, McpError> {
    Session::connect(
        "browser",
        "user-1",
        endpoint(),
        connector,
        &ClientDetails::default(),
        Duration::from_secs(30),
    )
    .await
}

#[tokio::test]
async fn connect_performs_handshake_once() {
    let connector = MockConnector::new();
    let session = connect(&connector).await.expect("session should connect");

    assert_eq!(connector.server.opens(), 1);
    assert_eq!(connector.server.initializes(), 1);
    assert_eq!(session.state(), SessionState::Connected);

    let info = session.info();
    assert_eq!(info.server_id, "browser");
    assert_eq!(info.identity, "user-1");
    assert_eq!(info.server_name, "mock");
    assert_eq!(info.protocol_version, "2025-11-25");
}

#[tokio::test]
async fn rejected_handshake_releases_transport() {
    let connector = MockConnector::new();
    connector
        .server
        .reject_initialize
        .store(true, Ordering::SeqCst);

    let err = connect(&connector).await.expect_err("handshake should fail");
    assert_eq!(err.kind(), "remote_error");
    assert_eq!(connector.server.closes(), 1);
    assert!(connector.transports()[0].is_closed());
}

#[tokio::test]
async fn failed_open_surfaces_transport_error() {
    let connector = MockConnector::new();
    connector.server.fail_opens.store(1, Ordering::SeqCst);

    let err = connect(&connector).await.expect_err("open should fail");
    assert!(matches!(err, McpError::TransportUnavailable(_)));
    assert_eq!(connector.server.initializes(), 0);
}

#[tokio::test]
async fn list_tools_follows_cursor_pages() {
    let connector = MockConnector::new();
    *connector.server.tool_page_size.lock().expect("lock") = Some(2);
    let session = connect(&connector).await.expect("session should connect");

    let tools = session.list_tools().await.expect("tools should list");
    let names: Vec<_> = tools.iter().map(|tool| tool.name.clone()).collect();
    assert_eq!(names, connector.server.tool_names());
    assert_eq!(tools[0].description.as_deref(), Some("Open a page"));
}

#[tokio::test]
async fn call_tool_passes_arguments_through() {
    let connector = MockConnector::new();
    let session = connect(&connector).await.expect("session should connect");

    let mut arguments = Map::new();
    arguments.insert("url".to_string(), Value::from("https://example.com"));
    let result = session
        .call_tool("navigate", Some(arguments))
        .await
        .expect("tool call should succeed");

    let text = result["content"][0]["text"].as_str().unwrap_or_default();
    assert!(text.starts_with("navigate"));
    assert!(text.contains("https://example.com"));

    let calls = connector.server.tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "navigate");
    assert_eq!(calls[0].1["url"], "https://example.com");
}

#[tokio::test]
async fn unknown_tool_is_reported_as_tool_not_found() {
    let connector = MockConnector::new();
    let session = connect(&connector).await.expect("session should connect");

    let err = session
        .call_tool("teleport", None)
        .await
        .expect_err("unknown tool should fail");
    assert!(err.is_tool_not_found());
}

#[tokio::test]
async fn empty_tool_name_is_rejected_locally() {
    let connector = MockConnector::new();
    let session = connect(&connector).await.expect("session should connect");
    let before = connector.server.requests();

    let err = session
        .call_tool("  ", None)
        .await
        .expect_err("blank name should fail");
    assert!(matches!(err, McpError::InvalidInput(_)));
    assert_eq!(connector.server.requests(), before);
}

#[tokio::test]
async fn resources_list_and_read() {
    let connector = MockConnector::new();
    let session = connect(&connector).await.expect("session should connect");

    let resources = session
        .list_resources()
        .await
        .expect("resources should list");
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].uri, "file:///notes.txt");
    assert_eq!(resources[0].mime_type.as_deref(), Some("text/plain"));

    let content = session
        .read_resource("file:///notes.txt")
        .await
        .expect("resource should read");
    assert_eq!(content.contents[0]["text"], "hello");

    let missing = session
        .read_resource("file:///missing.txt")
        .await
        .expect_err("unknown uri should fail");
    assert!(missing.is_resource_not_found());
}

#[tokio::test]
async fn terminated_transport_disconnects_session() {
    let connector = MockConnector::new();
    let session = connect(&connector).await.expect("session should connect");

    connector.transports()[0].terminate();
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(
        session.ping().await.expect_err("ping should fail"),
        McpError::NotConnected
    );
}

#[tokio::test]
async fn close_is_idempotent() {
    let connector = MockConnector::new();
    let session = connect(&connector).await.expect("session should connect");

    session.close().await.expect("close should succeed");
    session.close().await.expect("second close should be a no-op");
    assert_eq!(connector.server.closes(), 1);
    assert!(!session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn slow_call_does_not_close_session() {
    let connector = MockConnector::new();
    let session = connect(&connector).await.expect("session should connect");

    let slow = tokio::time::timeout(Duration::from_secs(5), session.call_tool(SLOW_TOOL, None))
        .await;
    assert!(slow.is_err());
    assert!(session.is_connected());
    session.ping().await.expect("ping should still succeed");
}
