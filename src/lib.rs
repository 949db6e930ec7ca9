//! mcp-relay keeps live Model Context Protocol sessions to remote tool servers
//! and relays capability calls to them.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`mcp`] owns the protocol side: transports (stdio subprocesses and
//!   streamable HTTP), sessions with their handshake and capability calls, the
//!   per-identity session manager, endpoint provisioning, and domain façades.
//! - [`core`] loads configuration, the built-in server profiles, and keyring
//!   tokens.
//! - [`api`] serves the HTTP routes over the session managers.
//! - [`logging`] installs the tracing subscriber.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod logging;
pub mod mcp;
