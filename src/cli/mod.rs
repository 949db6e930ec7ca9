//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod inspect;
pub mod serve;
pub mod token;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::cli::inspect::{call_tool, list_resources, list_tools, read_resource, print_status};
use crate::cli::serve::serve;
use crate::cli::token::{remove_token, set_token};
use crate::core::config::data::Config;
use crate::core::config::env::ProcessEnv;
use crate::core::token_store::McpTokenStore;
use crate::logging::{self, LogFormat};
use crate::mcp::registry::McpRegistry;
use crate::mcp::transport::DefaultConnector;

#[derive(Parser)]
#[command(name = "mcp-relay")]
#[command(about = "Session manager and HTTP relay for MCP tool servers")]
#[command(
    long_about = "mcp-relay keeps one live session per MCP server and identity, connecting \
on first use over stdio or streamable HTTP, and exposes the servers' tools and resources \
over a small HTTP API.\n\n\
Server profiles are read from config.toml in the platform config directory (or --config). \
Credentials come from environment variables named by each profile; `mcp-relay token set` \
stores bearer tokens in the system keyring for HTTP servers.\n\n\
Environment Variables:\n\
  RUST_LOG          Log filter (defaults to info)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the configuration file
    #[arg(short = 'c', long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP relay
    Serve {
        /// Socket address to listen on (overrides [server].bind)
        #[arg(short = 'b', long)]
        bind: Option<String>,
    },
    /// Show configuration and connectivity for each server
    Status {
        /// Only report this server
        server: Option<String>,
        /// Identity key for per-identity servers
        #[arg(short = 'u', long)]
        identity: Option<String>,
    },
    /// List the tools a server advertises
    Tools {
        server: String,
        #[arg(short = 'u', long)]
        identity: Option<String>,
    },
    /// Invoke a tool and print its result
    Call {
        server: String,
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(short = 'a', long)]
        args: Option<String>,
        #[arg(short = 'u', long)]
        identity: Option<String>,
        /// Deadline in seconds (defaults to the profile's request timeout)
        #[arg(short = 't', long)]
        timeout: Option<u64>,
    },
    /// List the resources a server exposes
    Resources {
        server: String,
        #[arg(short = 'u', long)]
        identity: Option<String>,
    },
    /// Read one resource by URI
    Read {
        server: String,
        uri: String,
        #[arg(short = 'u', long)]
        identity: Option<String>,
    },
    /// Manage bearer tokens stored in the system keyring
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Store a bearer token for an HTTP server
    Set { server: String, token: String },
    /// Remove a stored bearer token
    Remove { server: String },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    logging::init(args.log_format);
    tokio::runtime::Runtime::new()?.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    let config = Config::load(args.config.as_deref())?;

    let command = match args.command {
        Commands::Token { command } => {
            let store = McpTokenStore::new();
            return match command {
                TokenCommands::Set { server, token } => set_token(&store, &server, &token),
                TokenCommands::Remove { server } => remove_token(&store, &server),
            };
        }
        command => command,
    };

    let tokens = McpTokenStore::new_with_keyring(config.server.use_keyring());
    let registry = Arc::new(McpRegistry::from_config(
        &config,
        &ProcessEnv,
        &tokens,
        Arc::new(DefaultConnector),
    )?);

    let result = match command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind().to_string());
            serve(&bind, Arc::clone(&registry), config.server.is_production()).await
        }
        Commands::Status { server, identity } => {
            print_status(&registry, server.as_deref(), identity.as_deref()).await
        }
        Commands::Tools { server, identity } => {
            list_tools(&registry, &server, identity.as_deref()).await
        }
        Commands::Call {
            server,
            tool,
            args,
            identity,
            timeout,
        } => {
            call_tool(
                &registry,
                &server,
                &tool,
                args.as_deref(),
                identity.as_deref(),
                timeout,
            )
            .await
        }
        Commands::Resources { server, identity } => {
            list_resources(&registry, &server, identity.as_deref()).await
        }
        Commands::Read {
            server,
            uri,
            identity,
        } => read_resource(&registry, &server, &uri, identity.as_deref()).await,
        Commands::Token { .. } => Ok(()),
    };

    registry.disconnect_all().await;
    result
}

#[cfg(test)]
mod tests;
