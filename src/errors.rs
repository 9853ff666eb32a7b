use crate::services::{
    crypto::CryptoError, lifecycle::LifecycleError, storage_service::StorageError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Error returned by every handler; rendered as
/// `{"success": false, "error": ..., "status": ...}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Logs the cause and hides it from the client.
    pub fn internal(cause: impl fmt::Display) -> Self {
        tracing::error!(error = %cause, "internal error");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "File not found")
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        let status = match err {
            LifecycleError::Storage(err) => return err.into(),
            LifecycleError::Crypto(err) => return err.into(),
            LifecycleError::Internal(cause) => return AppError::internal(cause),
            LifecycleError::BadRequest(_) => StatusCode::BAD_REQUEST,
            LifecycleError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            LifecycleError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            LifecycleError::ForbiddenExtension => StatusCode::FORBIDDEN,
            LifecycleError::InvalidCredential | LifecycleError::Unauthorized(_) => {
                StatusCode::UNAUTHORIZED
            }
            LifecycleError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            LifecycleError::NotFound => StatusCode::NOT_FOUND,
            LifecycleError::NameExhausted => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidName => AppError::bad_request(err.to_string()),
            StorageError::MissingPayload(_) => AppError::not_found(),
            other => AppError::internal(other),
        }
    }
}

impl From<CryptoError> for AppError {
    fn from(err: CryptoError) -> Self {
        AppError::internal(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(format!("{err:#}"))
    }
}
