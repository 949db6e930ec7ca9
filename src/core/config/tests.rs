use super::data::{path_display, Config, DEFAULT_BIND};
use super::io::ConfigError;
use std::fs;
use tempfile::TempDir;

const SAMPLE: &str = r#"
[server]
bind = "0.0.0.0:8080"
environment = "production"
client_name = "relay-test"

[servers.github]
transport = "streamable-http"
base_url = "https://mcp.example.com/${TENANT}"
bearer_token_env = "GITHUB_MCP_TOKEN"
required_env = ["GITHUB_MCP_TOKEN"]
scope = "per-identity"
request_timeout_secs = 15

[servers.github.headers]
X-Tenant = "${TENANT}"

[servers.Browser]
enabled = false
"#;

#[test]
fn load_nonexistent_config_yields_defaults() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nonexistent_config.toml");

    let config = Config::load_from_path(&config_path).expect("Failed to load config");

    assert_eq!(config, Config::default());
    assert_eq!(config.server.bind(), DEFAULT_BIND);
    assert!(!config.server.is_production());
}

#[test]
fn load_parses_server_profiles() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, SAMPLE).expect("Failed to write config");

    let config = Config::load(Some(&config_path)).expect("Failed to load config");

    assert_eq!(config.server.bind(), "0.0.0.0:8080");
    assert!(config.server.is_production());
    assert_eq!(config.server.client_name.as_deref(), Some("relay-test"));

    let github = &config.servers["github"];
    assert_eq!(github.scope.as_deref(), Some("per-identity"));
    assert_eq!(github.request_timeout_secs(), 15);
    assert_eq!(github.connect_timeout_secs(), 30);
    assert_eq!(
        github
            .headers
            .as_ref()
            .and_then(|headers| headers.get("X-Tenant"))
            .map(String::as_str),
        Some("${TENANT}")
    );
}

#[test]
fn invalid_toml_reports_parse_error_with_path() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "[servers.broken\n").expect("Failed to write config");

    let err = Config::load_from_path(&config_path).expect_err("parse should fail");
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains(&path_display(&config_path)));
}

#[test]
fn effective_servers_overlay_builtins() {
    let config: Config = toml::from_str(SAMPLE).expect("sample should parse");
    let servers = config.effective_servers();

    let ids: Vec<&str> = servers.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["browser", "database", "github", "workspace"]);
    assert!(!servers["browser"].is_enabled());
    assert!(servers["database"].is_enabled());
}

#[test]
fn builtin_servers_can_be_disabled() {
    let config = Config {
        builtin_servers: Some(false),
        ..toml::from_str(SAMPLE).expect("sample should parse")
    };
    let ids: Vec<String> = config.effective_servers().into_keys().collect();
    assert_eq!(ids, vec!["browser".to_string(), "github".to_string()]);
}
