use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Errors returned by API handlers.
///
/// Every variant renders as `{"code": ..., "message": ...}` with a stable
/// machine-readable code.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Invalid url: {0}")]
    InvalidUrl(String),

    #[error("Url {0} not found")]
    UrlNotFound(i64),

    #[error("File {0} not found")]
    FileNotFound(i64),

    #[error("Url {0} is being processed")]
    CannotStopCurrentUrl(i64),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl HttpError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            HttpError::InvalidUrl(_) => (StatusCode::BAD_REQUEST, "invalid_url"),
            HttpError::UrlNotFound(_) => (StatusCode::NOT_FOUND, "url_not_found"),
            HttpError::FileNotFound(_) => (StatusCode::NOT_FOUND, "file_not_found"),
            HttpError::CannotStopCurrentUrl(_) => {
                (StatusCode::BAD_REQUEST, "cannot_stop_current_url")
            }
            HttpError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            HttpError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorBody {
            code,
            message: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for HttpError {
    fn from(err: StoreError) -> Self {
        HttpError::Internal(format!("Storage: {err}"))
    }
}
