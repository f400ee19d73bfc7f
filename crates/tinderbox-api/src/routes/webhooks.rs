//! GitHub webhook endpoint.
//!
//! Push and pull request deliveries become builds; everything else is
//! acknowledged and dropped.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tinderbox_core::{BuildEvent, BuildKind};
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;

const EVENT_HEADER: &str = "X-GitHub-Event";
const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
const DELIVERY_HEADER: &str = "X-GitHub-Delivery";

/// Pull request actions that change the code under test.
const BUILD_ACTIONS: &[&str] = &["opened", "synchronize", "reopened"];

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    ref_name: String,
    after: String,
    #[serde(default)]
    deleted: bool,
    repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    clone_url: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    action: String,
    number: u64,
    pull_request: PullRequestDetails,
}

#[derive(Debug, Deserialize)]
struct PullRequestDetails {
    head: HeadPayload,
    base: BasePayload,
}

#[derive(Debug, Deserialize)]
struct HeadPayload {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct BasePayload {
    repo: RepositoryPayload,
}

/// Receive a GitHub delivery.
pub async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if let Some(secret) = &state.http.secret {
        let signature = header(&headers, SIGNATURE_HEADER);
        if !verify_github_signature(secret, &body, signature) {
            warn!(delivery = ?header(&headers, DELIVERY_HEADER), "Invalid webhook signature");
            return Err(ApiError::Unauthorized(
                "webhook signature verification failed".to_string(),
            ));
        }
    }

    let event_type = header(&headers, EVENT_HEADER)
        .ok_or_else(|| ApiError::BadRequest(format!("missing {} header", EVENT_HEADER)))?;

    info!(
        event = %event_type,
        delivery = ?header(&headers, DELIVERY_HEADER),
        "Received GitHub webhook"
    );

    let Some(event) = build_event(event_type, &body)? else {
        return Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))).into_response());
    };

    let build = state
        .store
        .create_build(
            event.kind,
            &event.clone_url,
            &event.ref_name,
            &event.commit_sha,
        )
        .await?;
    state.queue.submit(build.id).await?;

    info!(
        build_id = %build.id,
        kind = %build.kind,
        r#ref = %build.ref_name,
        sha = %build.commit_sha,
        "Queued build"
    );
    Ok((StatusCode::ACCEPTED, Json(json!({ "id": build.id }))).into_response())
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Turn a delivery into the build it asks for, if any.
fn build_event(event_type: &str, body: &[u8]) -> Result<Option<BuildEvent>, ApiError> {
    match event_type {
        "push" => {
            let payload: PushPayload = parse(body)?;
            Ok(push_event(payload))
        }
        "pull_request" => {
            let payload: PullRequestPayload = parse(body)?;
            Ok(pull_request_event(payload))
        }
        "ping" => {
            info!("Ping event received, webhook is configured correctly");
            Ok(None)
        }
        _ => {
            info!(event = %event_type, "Unhandled event type");
            Ok(None)
        }
    }
}

fn parse<'de, T: Deserialize<'de>>(body: &'de [u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid payload: {}", e)))
}

fn push_event(payload: PushPayload) -> Option<BuildEvent> {
    if payload.ref_name.starts_with("refs/tags/") {
        info!(r#ref = %payload.ref_name, "Ignoring tag push");
        return None;
    }
    if payload.deleted || payload.after.bytes().all(|b| b == b'0') {
        info!(r#ref = %payload.ref_name, "Ignoring branch deletion");
        return None;
    }

    Some(BuildEvent {
        kind: BuildKind::Push,
        clone_url: payload.repository.clone_url,
        ref_name: payload.ref_name,
        commit_sha: payload.after,
    })
}

fn pull_request_event(payload: PullRequestPayload) -> Option<BuildEvent> {
    if !BUILD_ACTIONS.contains(&payload.action.as_str()) {
        info!(action = %payload.action, number = payload.number, "Ignoring pull request action");
        return None;
    }

    Some(BuildEvent {
        kind: BuildKind::PullRequest,
        clone_url: payload.pull_request.base.repo.clone_url,
        ref_name: format!("refs/pull/{}/head", payload.number),
        commit_sha: payload.pull_request.head.sha,
    })
}

/// Verify GitHub webhook signature.
fn verify_github_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    // Signature format: "sha256=<hex>"
    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}
