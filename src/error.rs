use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::auth::AuthError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            AppError::Auth(e) => auth_status(e),
        };

        (status, message).into_response()
    }
}

/// Auth failures carry user-facing text; infrastructure failures are logged
/// and hidden.
fn auth_status(err: &AuthError) -> (StatusCode, String) {
    match err {
        AuthError::NotAuthenticated => (StatusCode::UNAUTHORIZED, err.to_string()),
        AuthError::Forbidden => (StatusCode::FORBIDDEN, err.to_string()),
        AuthError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
        AuthError::MissingCredentials
        | AuthError::DuplicateUser
        | AuthError::InvalidCredentials
        | AuthError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        AuthError::RemoteOperationFailed(_) => (StatusCode::BAD_GATEWAY, err.to_string()),
        AuthError::BackendUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        AuthError::Storage(e) => {
            tracing::error!("Storage error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
        AuthError::Hashing(e) => {
            tracing::error!("Password hashing error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
