//! Resolves configured server profiles into session managers.

use crate::core::config::data::{Config, McpServerConfig, ServerSettings};
use crate::core::config::env::{expand_placeholders, EnvLookup};
use crate::core::config::io::ConfigError;
use crate::core::token_store::McpTokenStore;
use crate::mcp::client::ClientDetails;
use crate::mcp::facade::FacadeKind;
use crate::mcp::manager::{
    DisconnectReport, EndpointSource, ManagerSettings, SessionManager, SessionScope,
};
use crate::mcp::provisioning::HttpProvisioner;
use crate::mcp::transport::{
    Endpoint, HttpEndpoint, McpTransportKind, StdioEndpoint, TransportConnector,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProvisioningMode {
    Shared,
    Dedicated,
}

impl ProvisioningMode {
    fn parse(mode: Option<&str>) -> Result<Self, String> {
        match mode.unwrap_or("shared").to_ascii_lowercase().as_str() {
            "shared" => Ok(ProvisioningMode::Shared),
            "dedicated" => Ok(ProvisioningMode::Dedicated),
            other => Err(format!("Unsupported provisioning mode: {}", other)),
        }
    }
}

/// One enabled server profile with its session manager.
pub struct ServerEntry {
    pub id: String,
    pub display_name: String,
    pub facade: Option<FacadeKind>,
    pub project_id: Option<String>,
    pub manager: SessionManager,
}

pub struct McpRegistry {
    servers: BTreeMap<String, Arc<ServerEntry>>,
}

impl McpRegistry {
    pub fn from_config(
        config: &Config,
        env: &dyn EnvLookup,
        tokens: &McpTokenStore,
        connector: Arc<dyn TransportConnector>,
    ) -> Result<Self, ConfigError> {
        let mut servers = BTreeMap::new();
        for (id, server) in config.effective_servers() {
            if !server.is_enabled() {
                debug!(server_id = %id, "Skipping disabled MCP server");
                continue;
            }
            let entry = resolve_server(
                &id,
                &server,
                &config.server,
                env,
                tokens,
                Arc::clone(&connector),
            )?;
            if !entry.manager.is_configured() {
                debug!(
                    server_id = %id,
                    missing = ?entry.manager.missing_credentials(),
                    "MCP server is not configured"
                );
            }
            servers.insert(id, Arc::new(entry));
        }
        Ok(Self { servers })
    }

    pub fn servers(&self) -> impl Iterator<Item = &Arc<ServerEntry>> {
        self.servers.values()
    }

    pub fn find_server(&self, id: &str) -> Option<Arc<ServerEntry>> {
        self.servers.get(&id.to_ascii_lowercase()).cloned()
    }

    /// Tears down every session of every server; used at shutdown.
    pub async fn disconnect_all(&self) -> Vec<(String, DisconnectReport)> {
        let mut reports = Vec::with_capacity(self.servers.len());
        for (id, entry) in &self.servers {
            reports.push((id.clone(), entry.manager.disconnect_all().await));
        }
        reports
    }
}

fn resolve_server(
    id: &str,
    server: &McpServerConfig,
    settings: &ServerSettings,
    env: &dyn EnvLookup,
    tokens: &McpTokenStore,
    connector: Arc<dyn TransportConnector>,
) -> Result<ServerEntry, ConfigError> {
    let transport = McpTransportKind::parse(server.transport.as_deref())
        .map_err(|message| ConfigError::invalid(id, message))?;
    let scope = SessionScope::parse(server.scope.as_deref())
        .map_err(|message| ConfigError::invalid(id, message))?;
    let facade = server
        .facade
        .as_deref()
        .map(FacadeKind::parse)
        .transpose()
        .map_err(|message| ConfigError::invalid(id, message))?;
    let provisioning = server.provisioning.clone().unwrap_or_default();
    let mode = ProvisioningMode::parse(provisioning.mode.as_deref())
        .map_err(|message| ConfigError::invalid(id, message))?;

    let mut missing: Vec<String> = server
        .required_env
        .iter()
        .filter(|name| env.var(name).is_none())
        .cloned()
        .collect();

    let source = match transport {
        McpTransportKind::Stdio => {
            if mode == ProvisioningMode::Dedicated {
                return Err(ConfigError::invalid(
                    id,
                    "dedicated provisioning requires an HTTP transport",
                ));
            }
            let endpoint = resolve_stdio(id, server, env, &mut missing)?;
            EndpointSource::Static(Endpoint::Stdio(endpoint))
        }
        McpTransportKind::StreamableHttp => {
            let template = resolve_http(id, server, env, tokens, &mut missing);
            match mode {
                ProvisioningMode::Shared => {
                    if template.url.is_empty() {
                        missing.push(
                            server
                                .base_url_env
                                .clone()
                                .unwrap_or_else(|| "base_url".to_string()),
                        );
                    }
                    EndpointSource::Static(Endpoint::StreamableHttp(template))
                }
                ProvisioningMode::Dedicated => {
                    if scope != SessionScope::PerIdentity {
                        return Err(ConfigError::invalid(
                            id,
                            "dedicated provisioning requires scope = \"per-identity\"",
                        ));
                    }
                    let url = provisioning.url.clone().ok_or_else(|| {
                        ConfigError::invalid(id, "dedicated provisioning requires a url")
                    })?;
                    let url = expand_placeholders(&url, env, &mut missing);
                    let api_key_env = provisioning.api_key_env.clone().ok_or_else(|| {
                        ConfigError::invalid(id, "dedicated provisioning requires api_key_env")
                    })?;
                    match env.var(&api_key_env) {
                        Some(api_key) => {
                            let provisioner = HttpProvisioner::new(
                                url,
                                api_key,
                                provisioning.servers.clone(),
                                provisioning.url_field.clone(),
                                template,
                            )
                            .map_err(|err| ConfigError::invalid(id, err.to_string()))?;
                            EndpointSource::Provisioned(Arc::new(provisioner))
                        }
                        None => {
                            missing.push(api_key_env);
                            EndpointSource::Unconfigured
                        }
                    }
                }
            }
        }
    };

    let mut seen = std::collections::HashSet::new();
    missing.retain(|name| seen.insert(name.clone()));
    let source = if missing.is_empty() {
        source
    } else {
        EndpointSource::Unconfigured
    };

    let defaults = ClientDetails::default();
    let manager_settings = ManagerSettings {
        server_id: id.to_string(),
        scope,
        client: ClientDetails {
            name: settings.client_name.clone().unwrap_or(defaults.name),
            version: settings.client_version.clone().unwrap_or(defaults.version),
            protocol_version: server.protocol_version.clone(),
        },
        request_timeout: Duration::from_secs(server.request_timeout_secs()),
        connect_timeout: Duration::from_secs(server.connect_timeout_secs()),
        missing,
    };

    Ok(ServerEntry {
        id: id.to_string(),
        display_name: server.display_name.clone().unwrap_or_else(|| id.to_string()),
        facade,
        project_id: server
            .project_id_env
            .as_deref()
            .and_then(|name| env.var(name)),
        manager: SessionManager::new(manager_settings, source, connector),
    })
}

fn resolve_stdio(
    id: &str,
    server: &McpServerConfig,
    env: &dyn EnvLookup,
    missing: &mut Vec<String>,
) -> Result<StdioEndpoint, ConfigError> {
    let command = server
        .command
        .as_deref()
        .map(str::trim)
        .filter(|command| !command.is_empty())
        .ok_or_else(|| ConfigError::invalid(id, "stdio transport requires a command"))?;

    let args = server
        .args
        .iter()
        .flatten()
        .map(|arg| expand_placeholders(arg, env, missing))
        .collect();
    let vars = server
        .env
        .iter()
        .flatten()
        .map(|(key, value)| (key.clone(), expand_placeholders(value, env, missing)))
        .collect();

    Ok(StdioEndpoint {
        command: command.to_string(),
        args,
        env: vars,
        stderr_patterns: server.stderr_patterns(),
    })
}

fn resolve_http(
    id: &str,
    server: &McpServerConfig,
    env: &dyn EnvLookup,
    tokens: &McpTokenStore,
    missing: &mut Vec<String>,
) -> HttpEndpoint {
    let url = server
        .base_url_env
        .as_deref()
        .and_then(|name| env.var(name))
        .or_else(|| {
            server
                .base_url
                .as_deref()
                .map(|url| expand_placeholders(url, env, missing))
        })
        .unwrap_or_default();

    let headers = server
        .headers
        .iter()
        .flatten()
        .map(|(key, value)| (key.clone(), expand_placeholders(value, env, missing)))
        .collect();

    let bearer_token = server
        .bearer_token_env
        .as_deref()
        .and_then(|name| env.var(name))
        .or_else(|| match tokens.get_token(id) {
            Ok(token) => token,
            Err(err) => {
                warn!(server_id = %id, error = %err, "Failed to read MCP token from keyring");
                None
            }
        });

    HttpEndpoint {
        url: url.trim().to_string(),
        headers,
        bearer_token,
    }
}
