//! API error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use takbridge_core::{AuthError, StoreError};
use tracing::{error, warn};

/// JSON body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    Store(StoreError),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Auth(e) => {
                warn!(code = e.code(), error = %e, "Request rejected");
                (StatusCode::UNAUTHORIZED, ErrorResponse::new(e.code(), e.to_string()))
            }
            ApiError::Store(e @ (StoreError::NotFound { .. } | StoreError::NotFileShare { .. })) => {
                (StatusCode::NOT_FOUND, ErrorResponse::new("NOT_FOUND", e.to_string()))
            }
            ApiError::Store(e) => {
                error!(error = %e, "Store request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("STORE_ERROR", e.to_string()),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
