use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::repositories::RepositoryError;
use crate::services::auth_service::AuthError;
use crate::services::passkey_service::PasskeyError;

// Type alias for Result with our AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Which upstream failure an [`AppError::Upstream`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamKind {
    BadGateway,
    Unavailable,
    Timeout,
}

impl UpstreamKind {
    fn status(self) -> StatusCode {
        match self {
            UpstreamKind::BadGateway => StatusCode::BAD_GATEWAY,
            UpstreamKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            UpstreamKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Upstream { kind: UpstreamKind, message: String },

    /// A 500 whose message is safe to show to clients.
    #[error("{0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Conflict(_) | AppError::Forbidden(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Upstream { kind, .. } => kind.status(),
            AppError::Unavailable(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Database(e) => AppError::Database(e),
            RepositoryError::Conflict(detail) => {
                tracing::debug!("Unique constraint violation: {}", detail);
                AppError::Conflict("Resource already exists".to_string())
            }
            RepositoryError::NotFound => AppError::NotFound("Not found".to_string()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        let message = err.to_string();
        match err {
            AuthError::Validation(msg) => AppError::Validation(msg),
            AuthError::EmailAlreadyRegistered
            | AuthError::EmailInUse
            | AuthError::EtLabAccountTaken => AppError::Conflict(message),
            AuthError::NothingToUpdate
            | AuthError::InvalidResetToken
            | AuthError::ResetTokenExpired
            | AuthError::ResetTokenUsed
            | AuthError::AlreadyVerified
            | AuthError::InvalidSignupToken
            | AuthError::AccountAlreadyCompleted
            | AuthError::MissingOAuthParams
            | AuthError::GoogleTokenExchange
            | AuthError::GoogleUserInfo
            | AuthError::GoogleNotLinked => AppError::Validation(message),
            AuthError::PasswordRequired => AppError::Forbidden(message),
            AuthError::InvalidCredentials
            | AuthError::InvalidRefreshToken
            | AuthError::RefreshTokenNotFound
            | AuthError::RefreshTokenExpired
            | AuthError::InvalidAccessToken
            | AuthError::UserNotFound
            | AuthError::EtLabInvalidCredentials => AppError::Unauthorized(message),
            AuthError::EtLabTimeout => AppError::Upstream {
                kind: UpstreamKind::Timeout,
                message,
            },
            AuthError::EtLabUnavailable => AppError::Upstream {
                kind: UpstreamKind::Unavailable,
                message,
            },
            AuthError::EtLabFailed => AppError::Upstream {
                kind: UpstreamKind::BadGateway,
                message,
            },
            AuthError::GoogleNotConfigured | AuthError::PhotoUpload => {
                AppError::Unavailable(message)
            }
            AuthError::Repository(e) => e.into(),
            AuthError::Token(_) | AuthError::Session(_) | AuthError::Challenge(_) => {
                AppError::Internal(message)
            }
        }
    }
}

impl From<PasskeyError> for AppError {
    fn from(err: PasskeyError) -> Self {
        let message = err.to_string();
        match err {
            PasskeyError::Validation(msg) => AppError::Validation(msg),
            PasskeyError::AlreadyRegistered => AppError::Conflict(message),
            PasskeyError::InvalidChallenge
            | PasskeyError::UserNotFound
            | PasskeyError::NoPasskeys
            | PasskeyError::InvalidCredential
            | PasskeyError::EmailMismatch => AppError::Validation(message),
            PasskeyError::PasskeyNotFound => AppError::NotFound(message),
            PasskeyError::Repository(e) => e.into(),
            PasskeyError::Session(_) | PasskeyError::Challenge(_) => AppError::Internal(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match &self {
            AppError::Database(_) | AppError::Internal(_) => {
                tracing::error!("Request failed: {}", self);
                "Internal server error".to_string()
            }
            AppError::Upstream { .. } | AppError::Unavailable(_) => {
                tracing::error!("Request failed with {}: {}", status, self);
                self.to_string()
            }
            _ => self.to_string(),
        };

        (
            status,
            Json(json!({ "success": false, "error": error_message })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_map_to_taxonomy() {
        assert_eq!(
            AppError::from(AuthError::EmailAlreadyRegistered).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(AuthError::PasswordRequired).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(AuthError::InvalidCredentials).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::from(AuthError::EtLabTimeout).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AppError::from(AuthError::EtLabUnavailable).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::from(AuthError::EtLabFailed).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::from(AuthError::GoogleNotConfigured).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_passkey_not_found_is_404() {
        assert_eq!(
            AppError::from(PasskeyError::PasskeyNotFound).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(PasskeyError::NoPasskeys).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_repository_conflict_is_client_error() {
        let err = AppError::from(AuthError::Repository(RepositoryError::Conflict(
            "users.email".to_string(),
        )));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_internal_errors_do_not_leak_details() {
        let response = AppError::Internal("secret detail".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "Internal server error");
    }
}
