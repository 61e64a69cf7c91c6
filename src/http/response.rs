//! JSON error responses.

use crate::application::gate::{RejectReason, Rejection};
use crate::http::admission::{insert_rate_limit_headers, whole_seconds};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Body sent with `429 Too Many Requests`.
pub const TOO_MANY_REQUESTS: &str = "Too many requests";
/// Body sent with `503 Service Unavailable`.
pub const SERVICE_UNAVAILABLE: &str = "Service temporarily unavailable";

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        match self.reason {
            RejectReason::BudgetExhausted(budget) => {
                let mut response = failure(StatusCode::TOO_MANY_REQUESTS, TOO_MANY_REQUESTS);
                let headers = response.headers_mut();
                insert_rate_limit_headers(headers, &budget);
                headers.insert(
                    header::RETRY_AFTER,
                    HeaderValue::from(whole_seconds(budget.reset_after).max(1)),
                );
                response
            }
            RejectReason::StoreUnavailable => {
                failure(StatusCode::SERVICE_UNAVAILABLE, SERVICE_UNAVAILABLE)
            }
        }
    }
}

/// Errors returned by service route handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or invalid input
    #[error("{0}")]
    BadRequest(String),

    /// The gateway did not identify the caller
    #[error("Authentication required")]
    Unauthorized,

    /// The resource does not exist
    #[error("{0}")]
    NotFound(String),

    /// Anything else
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Internal(e) => {
                tracing::error!(error = %format!("{:#}", e), "request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        failure(status, &message)
    }
}

fn failure(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "message": message }))).into_response()
}
