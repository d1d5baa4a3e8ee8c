//! HTTP error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

/// Handler result type
pub type AppResult<T> = Result<T, AppError>;

/// Errors a request can end in
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] reporef_core::Error),

    #[error("Not found")]
    NotFound,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        use reporef_core::Error;

        match self {
            AppError::Core(Error::UnsupportedProvider(_)) => StatusCode::NOT_FOUND,
            AppError::Core(Error::MalformedIdentity(_)) => StatusCode::BAD_REQUEST,
            AppError::Core(Error::Sync(_)) | AppError::Core(Error::InitFailed(_)) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Core(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            AppError::Core(e) if e.is_resolution() => debug!("Rejected request path: {}", e),
            _ if status.is_server_error() => warn!("Request failed: {}", self),
            _ => {}
        }
        (status, format!("{}\n", self)).into_response()
    }
}
