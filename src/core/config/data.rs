use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_ENVIRONMENT: &str = "development";
pub const DEFAULT_STDERR_PATTERN: &str = "error";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,
    /// Include the server profiles shipped with the binary
    pub builtin_servers: Option<bool>,
    /// Server profiles keyed by id; an id shared with a built-in replaces it
    #[serde(default)]
    pub servers: BTreeMap<String, McpServerConfig>,
}

/// Settings for the HTTP surface and the handshake identity.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct ServerSettings {
    /// Socket address for `serve`, e.g. "127.0.0.1:3000"
    pub bind: Option<String>,
    /// "production" hides error traces from HTTP responses
    pub environment: Option<String>,
    pub client_name: Option<String>,
    pub client_version: Option<String>,
    /// Look up bearer tokens in the OS keyring when no env var supplies one
    pub use_keyring: Option<bool>,
}

impl ServerSettings {
    pub fn bind(&self) -> &str {
        self.bind.as_deref().unwrap_or(DEFAULT_BIND)
    }

    pub fn environment(&self) -> &str {
        self.environment.as_deref().unwrap_or(DEFAULT_ENVIRONMENT)
    }

    pub fn is_production(&self) -> bool {
        self.environment().eq_ignore_ascii_case("production")
    }

    pub fn use_keyring(&self) -> bool {
        self.use_keyring.unwrap_or(false)
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct McpServerConfig {
    pub display_name: Option<String>,
    /// "stdio" or "streamable-http" (default)
    pub transport: Option<String>,
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub env: Option<BTreeMap<String, String>>,
    /// Case-insensitive substrings selecting which stderr lines reach the log
    pub stderr_patterns: Option<Vec<String>>,
    pub base_url: Option<String>,
    /// Environment variable holding a direct server URL; wins over `base_url`
    pub base_url_env: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    pub bearer_token_env: Option<String>,
    /// Variables that must be set before the server counts as configured
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_env: Vec<String>,
    /// "global" (default) or "per-identity"
    pub scope: Option<String>,
    pub protocol_version: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub provisioning: Option<ProvisioningConfig>,
    /// "browser" or "database"
    pub facade: Option<String>,
    pub project_id_env: Option<String>,
    pub enabled: Option<bool>,
}

impl McpServerConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn stderr_patterns(&self) -> Vec<String> {
        self.stderr_patterns
            .clone()
            .unwrap_or_else(|| vec![DEFAULT_STDERR_PATTERN.to_string()])
    }

    pub fn request_timeout_secs(&self) -> u64 {
        self.request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
    }

    pub fn connect_timeout_secs(&self) -> u64 {
        self.connect_timeout_secs
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS)
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct ProvisioningConfig {
    /// "shared" (default) or "dedicated"
    pub mode: Option<String>,
    /// Allocation endpoint for dedicated mode
    pub url: Option<String>,
    /// Environment variable holding the allocation API key
    pub api_key_env: Option<String>,
    /// Response field carrying the allocated server URL
    pub url_field: Option<String>,
    /// Server names forwarded in the allocation request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<String>,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
