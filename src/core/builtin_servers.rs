//! Built-in server profiles
//!
//! Profiles for the tool servers the relay knows out of the box, embedded
//! from builtin_servers.toml at build time.

use crate::core::config::data::McpServerConfig;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
struct BuiltinServersConfig {
    servers: BTreeMap<String, McpServerConfig>,
}

/// Load built-in server profiles from the embedded configuration
pub fn load_builtin_servers() -> Result<BTreeMap<String, McpServerConfig>, toml::de::Error> {
    const CONFIG_CONTENT: &str = include_str!("../builtin_servers.toml");

    let config: BuiltinServersConfig = toml::from_str(CONFIG_CONTENT)?;
    Ok(config.servers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_servers_parse() {
        let servers = load_builtin_servers().expect("built-in profiles should parse");
        let ids: Vec<&str> = servers.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["browser", "database", "workspace"]);
    }

    #[test]
    fn builtin_browser_requires_credentials() {
        let servers = load_builtin_servers().expect("built-in profiles should parse");
        let browser = &servers["browser"];
        assert_eq!(browser.transport.as_deref(), Some("stdio"));
        assert_eq!(browser.facade.as_deref(), Some("browser"));
        assert_eq!(
            browser.required_env,
            vec!["BROWSERBASE_API_KEY", "BROWSERBASE_PROJECT_ID"]
        );
        assert_eq!(browser.stderr_patterns(), vec!["error"]);
    }

    #[test]
    fn builtin_workspace_is_per_identity() {
        let servers = load_builtin_servers().expect("built-in profiles should parse");
        let workspace = &servers["workspace"];
        assert_eq!(workspace.scope.as_deref(), Some("per-identity"));
        assert_eq!(
            workspace
                .provisioning
                .as_ref()
                .and_then(|provisioning| provisioning.mode.as_deref()),
            Some("shared")
        );
    }
}
