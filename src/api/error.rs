use crate::protocol::ErrorBody;
use crate::session::ServiceError;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Body could not be read as the expected JSON
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Whole seconds to advertise in `Retry-After`, never zero
pub(crate) fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let service_error = match self {
            ApiError::InvalidRequest(message) => {
                return (StatusCode::BAD_REQUEST, Json(ErrorBody::message(message))).into_response()
            }
            ApiError::Service(e) => e,
        };

        let (status, body) = match service_error {
            ServiceError::InvalidRequest(message) => {
                (StatusCode::BAD_REQUEST, ErrorBody::message(message))
            }
            ServiceError::Forbidden(message) => (StatusCode::FORBIDDEN, ErrorBody::message(message)),
            ServiceError::NotFound(message) => (StatusCode::NOT_FOUND, ErrorBody::message(message)),
            ServiceError::QuotaExceeded {
                used,
                limit,
                requested,
            } => (
                StatusCode::BAD_REQUEST,
                ErrorBody::quota_exceeded(used, limit, requested),
            ),
            ServiceError::RateLimited { retry_after } => {
                let secs = retry_after_secs(retry_after);
                let body = ErrorBody {
                    retry_after: Some(secs),
                    ..ErrorBody::message("Too many requests")
                };
                let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(secs));
                return response;
            }
            ServiceError::Internal(message) => {
                error!("Request failed: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorBody::message(message))
            }
            e @ (ServiceError::Database(_) | ServiceError::Storage(_)) => {
                error!("Request failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::message("Internal server error"),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
