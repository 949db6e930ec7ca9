use std::error::Error;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::{create_router, state::AppState};
use crate::mcp::registry::McpRegistry;

pub async fn serve(
    bind: &str,
    registry: Arc<McpRegistry>,
    production: bool,
) -> Result<(), Box<dyn Error>> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|err| format!("Invalid bind address '{bind}': {err}"))?;
    let app = create_router(AppState::new(Arc::clone(&registry), production))
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(addr).await?;
    info!(
        "mcp-relay v{} listening on http://{}",
        env!("CARGO_PKG_VERSION"),
        addr
    );
    for entry in registry.servers() {
        info!(
            server_id = %entry.id,
            configured = entry.manager.is_configured(),
            scope = ?entry.manager.scope(),
            "Registered MCP server"
        );
    }

    serve_until(listener, app, &registry, shutdown_signal()).await
}

/// Serves until `shutdown` resolves, then closes every session whether or not
/// the server loop failed.
async fn serve_until<F>(
    listener: TcpListener,
    app: Router,
    registry: &McpRegistry,
    shutdown: F,
) -> Result<(), Box<dyn Error>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    if let Err(err) = &served {
        warn!(error = %err, "HTTP server stopped with an error");
    }

    for (server_id, report) in registry.disconnect_all().await {
        for (identity, err) in report.failures {
            warn!(server_id = %server_id, identity = %identity, error = %err, "Session did not close cleanly");
        }
    }
    info!("Shutdown complete");
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown requested; draining connections");
}
