//! Health check endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Ready once the store answers queries.
async fn ready(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let pending = state.store.pending_builds().await?;
    Ok(Json(json!({ "status": "ready", "pending": pending.len() })))
}
