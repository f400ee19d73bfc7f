//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tinderbox_db::DbError;
use tinderbox_scheduler::SchedulerError;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    BadGateway(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<tinderbox_core::Error> for ApiError {
    fn from(err: tinderbox_core::Error) -> Self {
        match err {
            tinderbox_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            tinderbox_core::Error::ExternalService(msg) => ApiError::BadGateway(msg),
            tinderbox_core::Error::NotConfigured(msg) => ApiError::ServiceUnavailable(msg),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => ApiError::NotFound(msg),
            DbError::InvalidRange { .. } => ApiError::BadRequest(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::QueueClosed(_) => ApiError::ServiceUnavailable(err.to_string()),
            SchedulerError::Store(e) => e.into(),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinderbox_core::BuildId;

    #[test]
    fn test_db_errors_map_to_status_codes() {
        let not_found: ApiError = DbError::NotFound("build 1".to_string()).into();
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);

        let range: ApiError = DbError::InvalidRange {
            start: 3,
            end: 1,
            message: "start must not exceed end",
        }
        .into();
        assert_eq!(range.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_core_errors_map_to_status_codes() {
        let invalid: ApiError = tinderbox_core::Error::InvalidInput("kind".to_string()).into();
        assert_eq!(invalid.into_response().status(), StatusCode::BAD_REQUEST);

        let upstream: ApiError = tinderbox_core::Error::ExternalService("github".to_string()).into();
        assert_eq!(upstream.into_response().status(), StatusCode::BAD_GATEWAY);

        let missing: ApiError = tinderbox_core::Error::NotConfigured("remote".to_string()).into();
        assert_eq!(missing.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_closed_queue_is_unavailable() {
        let err: ApiError = SchedulerError::QueueClosed(BuildId::new(1)).into();
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
