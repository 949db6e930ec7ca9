//! Shared state handed to every route.

use crate::mcp::registry::McpRegistry;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<McpRegistry>,
    /// Hides error traces from responses.
    pub production: bool,
}

impl AppState {
    pub fn new(registry: Arc<McpRegistry>, production: bool) -> Self {
        Self {
            registry,
            production,
        }
    }
}
