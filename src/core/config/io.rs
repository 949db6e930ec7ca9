use crate::core::builtin_servers::load_builtin_servers;
use crate::core::config::data::{path_display, Config, McpServerConfig};
use directories::ProjectDirs;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Errors that can occur when loading or resolving configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    Read {
        /// Path to the configuration file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the configuration file as valid TOML.
    Parse {
        /// Path to the configuration file with invalid TOML.
        path: PathBuf,
        /// The TOML deserialization error.
        source: toml::de::Error,
    },

    /// A server profile is internally inconsistent.
    Invalid { server_id: String, message: String },
}

impl ConfigError {
    fn display_path(path: &Path) -> String {
        path_display(path)
    }

    pub(crate) fn invalid(server_id: &str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            server_id: server_id.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(
                    f,
                    "Failed to read config at {}: {}",
                    Self::display_path(path),
                    source
                )
            }
            ConfigError::Parse { path, source } => {
                write!(
                    f,
                    "Failed to parse config at {}: {}",
                    Self::display_path(path),
                    source
                )
            }
            ConfigError::Invalid { server_id, message } => {
                write!(f, "Invalid configuration for server '{}': {}", server_id, message)
            }
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid { .. } => None,
        }
    }
}

impl Config {
    pub fn load_from_path(config_path: &Path) -> Result<Config, ConfigError> {
        if config_path.exists() {
            let contents = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
                path: config_path.to_path_buf(),
                source,
            })?;
            let config: Config =
                toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: config_path.to_path_buf(),
                    source,
                })?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Loads `explicit` when given, otherwise the platform default location.
    pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
        match explicit {
            Some(path) => Self::load_from_path(path),
            None => match Self::get_config_path() {
                Some(path) => Self::load_from_path(&path),
                None => Ok(Config::default()),
            },
        }
    }

    pub fn get_config_path() -> Option<PathBuf> {
        let proj_dirs = ProjectDirs::from("org", "mcp-relay", "mcp-relay")?;
        Some(proj_dirs.config_dir().join("config.toml"))
    }

    /// Built-in profiles (unless disabled) overlaid with user profiles.
    /// Ids are normalized to lowercase.
    pub fn effective_servers(&self) -> BTreeMap<String, McpServerConfig> {
        let mut servers = BTreeMap::new();
        if self.builtin_servers.unwrap_or(true) {
            match load_builtin_servers() {
                Ok(builtins) => {
                    for (id, server) in builtins {
                        servers.insert(id.to_ascii_lowercase(), server);
                    }
                }
                Err(err) => warn!(error = %err, "Ignoring unreadable built-in server profiles"),
            }
        }
        for (id, server) in &self.servers {
            servers.insert(id.to_ascii_lowercase(), server.clone());
        }
        servers
    }
}
