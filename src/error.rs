use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::scheduling::ServiceError;

/// Seconds a client should wait before retrying a 503.
const RETRY_AFTER_SECS: &str = "1";

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    ServiceUnavailable(&'static str, String),
    Internal(String),
}

impl ApiError {
    fn to_error_response(code: &str, message: &str) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
            },
        })
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        if e.is_retryable() {
            tracing::info!(error = %e, "asking client to retry");
        }
        match e {
            ServiceError::Validation(msg) => ApiError::BadRequest("VALIDATION_ERROR", msg),
            ServiceError::DuplicateIdentifier(msg) => {
                ApiError::Conflict("DUPLICATE_IDENTIFIER", msg)
            }
            ServiceError::Conflict(msg) => ApiError::Conflict("CONFLICT", msg),
            e @ ServiceError::NotFound(_) => ApiError::NotFound("NOT_FOUND", e.to_string()),
            ServiceError::Transient(msg) => ApiError::ServiceUnavailable("TRY_AGAIN", msg),
            ServiceError::Persistence(msg) => {
                tracing::error!(error = %msg, "persistence failure");
                ApiError::Internal("internal error".into())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(code, msg) => {
                (StatusCode::BAD_REQUEST, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::NotFound(code, msg) => {
                (StatusCode::NOT_FOUND, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Conflict(code, msg) => {
                (StatusCode::CONFLICT, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::ServiceUnavailable(code, msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::RETRY_AFTER, RETRY_AFTER_SECS)],
                ApiError::to_error_response(code, &msg),
            )
                .into_response(),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::to_error_response("INTERNAL", &msg),
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(e: ServiceError) -> StatusCode {
        ApiError::from(e).into_response().status()
    }

    #[test]
    fn service_errors_map_to_statuses() {
        assert_eq!(status_of(ServiceError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(ServiceError::DuplicateIdentifier("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(ServiceError::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(status_of(ServiceError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(ServiceError::Persistence("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn transient_asks_client_to_retry() {
        let response = ApiError::from(ServiceError::Transient("busy".into())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], RETRY_AFTER_SECS);
    }

    #[test]
    fn persistence_details_stay_out_of_the_body() {
        let ApiError::Internal(msg) =
            ApiError::from(ServiceError::Persistence("password=hunter2".into()))
        else {
            panic!("expected internal");
        };
        assert!(!msg.contains("hunter2"));
    }
}
