//! API routes.

pub mod builds;
pub mod health;
pub mod webhooks;

use crate::AppState;
use axum::Router;
use axum::routing::post;

/// Build the main router. The webhook is mounted at the configured path.
pub fn router(state: AppState) -> Router {
    let webhook_path = state.http.webhook_path.clone();
    Router::new()
        .route(&webhook_path, post(webhooks::github_webhook))
        .nest("/api/v1", builds::router())
        .merge(health::router())
        .with_state(state)
}
