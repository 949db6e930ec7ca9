//! HTTP routes over the session managers.

pub mod actions;
pub mod error;
pub mod handlers;
pub mod state;

use crate::api::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub use error::ApiError;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/mcp/:server",
            post(handlers::post_action)
                .get(handlers::get_status)
                .delete(handlers::delete_session),
        )
        .route("/health", get(handlers::health))
        .with_state(state)
}
