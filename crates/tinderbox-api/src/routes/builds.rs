//! Read-only build endpoints.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tinderbox_core::{Build, BuildId, BuildKind, BuildStatus, OutputRecord};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/builds/{id}", get(get_build))
        .route("/builds/{id}/status", get(get_status))
        .route("/builds/{id}/output", get(get_output))
        .route("/commits/{sha}/builds", get(commit_builds))
        .route("/refs/{kind}", get(list_refs))
        .route("/refs/{kind}/builds", get(ref_builds))
        .route("/branches", get(list_branches))
}

#[derive(Debug, Serialize)]
struct BuildResponse {
    #[serde(flatten)]
    build: Build,
    status: BuildStatus,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    id: BuildId,
    status: BuildStatus,
}

/// `start..end` window; `end = -1` reads to the end.
#[derive(Debug, Deserialize)]
struct RangeQuery {
    #[serde(default)]
    start: i64,
    #[serde(default = "unbounded")]
    end: i64,
}

#[derive(Debug, Deserialize)]
struct RefBuildsQuery {
    #[serde(rename = "ref")]
    ref_name: String,
    #[serde(default)]
    start: i64,
    #[serde(default = "unbounded")]
    end: i64,
}

fn unbounded() -> i64 {
    -1
}

async fn with_status(state: &AppState, builds: Vec<Build>) -> Result<Vec<BuildResponse>, ApiError> {
    let mut response = Vec::with_capacity(builds.len());
    for build in builds {
        let status = state.store.status(build.id).await?;
        response.push(BuildResponse { build, status });
    }
    Ok(response)
}

async fn get_build(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
) -> Result<Json<BuildResponse>, ApiError> {
    let build = state.store.build(id).await?;
    let status = state.store.status(id).await?;
    Ok(Json(BuildResponse { build, status }))
}

async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = state.store.status(id).await?;
    Ok(Json(StatusResponse { id, status }))
}

async fn get_output(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<OutputRecord>>, ApiError> {
    // Unknown builds are a 404, not an empty log.
    state.store.build(id).await?;
    let output = state.store.output(id, range.start, range.end).await?;
    Ok(Json(output))
}

async fn commit_builds(
    State(state): State<AppState>,
    Path(sha): Path<String>,
) -> Result<Json<Vec<BuildResponse>>, ApiError> {
    let builds = state.store.sha_builds(&sha).await?;
    Ok(Json(with_status(&state, builds).await?))
}

async fn list_refs(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    let kind: BuildKind = kind.parse()?;
    Ok(Json(state.store.refs(kind).await?))
}

async fn ref_builds(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<RefBuildsQuery>,
) -> Result<Json<Vec<BuildResponse>>, ApiError> {
    let kind: BuildKind = kind.parse()?;
    let builds = state
        .store
        .ref_builds(kind, &query.ref_name, query.start, query.end)
        .await?;
    Ok(Json(with_status(&state, builds).await?))
}

async fn list_branches(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    let remote = state.remote.as_ref().ok_or_else(|| {
        tinderbox_core::Error::NotConfigured("no remote repository is configured".to_string())
    })?;
    Ok(Json(remote.list_remote_branches().await?))
}
