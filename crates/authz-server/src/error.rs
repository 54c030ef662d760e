use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use kernel::AuthzError;
use serde::Serialize;
use tracing::error;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, message = %self.message, "request failed");
        }
        let body = Json(ErrorBody {
            error: self.status.as_str().to_string(),
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<AuthzError> for AppError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::AuthenticationFailed(failure) => AppError::unauthorized(failure.to_string()),
            AuthzError::CacheNotPrimed
            | AuthzError::RevocationCacheUnavailable(_)
            | AuthzError::ShuttingDown => AppError::unavailable(err.to_string()),
            AuthzError::Internal(message) => AppError::internal(message),
        }
    }
}

impl From<control_plane::RepositoryError> for AppError {
    fn from(err: control_plane::RepositoryError) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<control_plane::ReplicationError> for AppError {
    fn from(err: control_plane::ReplicationError) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<control_plane::ConfigError> for AppError {
    fn from(err: control_plane::ConfigError) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status.as_str(), self.message)
    }
}

impl std::error::Error for AppError {}
