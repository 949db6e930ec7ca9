//! One-shot commands that talk to a single server and print the outcome.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::mcp::registry::{McpRegistry, ServerEntry};

fn find_server(registry: &McpRegistry, server: &str) -> Result<Arc<ServerEntry>, Box<dyn Error>> {
    registry
        .find_server(server)
        .ok_or_else(|| format!("Unknown MCP server: {server}").into())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parses `--args`; only JSON objects are accepted.
pub fn parse_arguments(raw: Option<&str>) -> Result<Option<Map<String, Value>>, Box<dyn Error>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(Some(map)),
        Value::Null => Ok(None),
        _ => Err("--args must be a JSON object".into()),
    }
}

pub async fn print_status(
    registry: &McpRegistry,
    server: Option<&str>,
    identity: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    let entries: Vec<Arc<ServerEntry>> = match server {
        Some(server) => vec![find_server(registry, server)?],
        None => registry.servers().cloned().collect(),
    };
    if entries.is_empty() {
        println!("No MCP servers configured.");
        return Ok(());
    }

    for entry in entries {
        let manager = &entry.manager;
        if !manager.is_configured() {
            println!(
                "❌ {} ({}): not configured; missing {}",
                entry.id,
                entry.display_name,
                manager.missing_credentials().join(", ")
            );
            continue;
        }
        let Ok(identity) = manager.resolve_identity(identity) else {
            println!(
                "⚪ {} ({}): configured; pass --identity to check",
                entry.id, entry.display_name
            );
            continue;
        };
        match manager.client(&identity).list_tools().await {
            Ok(tools) => println!(
                "✅ {} ({}): connected, {} tools",
                entry.id,
                entry.display_name,
                tools.len()
            ),
            Err(err) => println!("⚠️ {} ({}): {}", entry.id, entry.display_name, err),
        }
    }
    Ok(())
}

pub async fn list_tools(
    registry: &McpRegistry,
    server: &str,
    identity: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    let entry = find_server(registry, server)?;
    let identity = entry.manager.resolve_identity(identity)?;
    let tools = entry.manager.client(&identity).list_tools().await?;
    if tools.is_empty() {
        println!("{} advertises no tools.", entry.id);
        return Ok(());
    }
    for tool in tools {
        match tool.description {
            Some(description) => println!("{}\t{}", tool.name, description),
            None => println!("{}", tool.name),
        }
    }
    Ok(())
}

pub async fn call_tool(
    registry: &McpRegistry,
    server: &str,
    tool: &str,
    args: Option<&str>,
    identity: Option<&str>,
    timeout: Option<u64>,
) -> Result<(), Box<dyn Error>> {
    let entry = find_server(registry, server)?;
    let arguments = parse_arguments(args)?;
    let identity = entry.manager.resolve_identity(identity)?;
    let mut client = entry.manager.client(&identity);
    if let Some(secs) = timeout {
        client = client.with_timeout(Duration::from_secs(secs));
    }
    let result = client.call_tool(tool, arguments).await?;
    print_json(&result)
}

pub async fn list_resources(
    registry: &McpRegistry,
    server: &str,
    identity: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    let entry = find_server(registry, server)?;
    let identity = entry.manager.resolve_identity(identity)?;
    let resources = entry.manager.client(&identity).list_resources().await?;
    print_json(&resources)
}

pub async fn read_resource(
    registry: &McpRegistry,
    server: &str,
    uri: &str,
    identity: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    let entry = find_server(registry, server)?;
    let identity = entry.manager.resolve_identity(identity)?;
    let content = entry.manager.client(&identity).read_resource(uri).await?;
    print_json(&content)
}
