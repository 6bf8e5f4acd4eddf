//! Error types for the circulation engine

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Machine-readable failure kinds rendered by the admin UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Success = 0,
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NotFound = 5,
    NoCopyAvailable = 7,
    DuplicateRequest = 8,
    RenewalLimitExceeded = 11,
    BadValue = 18,
    InvalidTransition = 22,
    PickupDeadlinePassed = 23,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Duplicate request: {0}")]
    DuplicateRequest(String),

    #[error("No copy available: {0}")]
    NoCopyAvailable(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Renewal limit exceeded: {0}")]
    RenewalLimitExceeded(String),

    #[error("Pickup deadline passed: {0}")]
    PickupDeadlinePassed(String),
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Authentication(_) | AppError::Authorization(_) => ErrorCode::NotAuthorized,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::Validation(_) => ErrorCode::BadValue,
            AppError::Database(_) | AppError::Migration(_) => ErrorCode::DbFailure,
            AppError::Internal(_) => ErrorCode::Failure,
            AppError::DuplicateRequest(_) => ErrorCode::DuplicateRequest,
            AppError::NoCopyAvailable(_) => ErrorCode::NoCopyAvailable,
            AppError::InvalidTransition(_) => ErrorCode::InvalidTransition,
            AppError::RenewalLimitExceeded(_) => ErrorCode::RenewalLimitExceeded,
            AppError::PickupDeadlinePassed(_) => ErrorCode::PickupDeadlinePassed,
        }
    }

    /// Recoverable business outcome, as opposed to a storage or internal failure
    pub fn is_expected(&self) -> bool {
        !matches!(
            self,
            AppError::Database(_) | AppError::Migration(_) | AppError::Internal(_)
        )
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, message) = match &self {
            AppError::Authentication(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Authorization(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            AppError::Migration(e) => {
                tracing::error!("Migration error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::DuplicateRequest(msg)
            | AppError::NoCopyAvailable(msg)
            | AppError::InvalidTransition(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::RenewalLimitExceeded(msg) | AppError::PickupDeadlinePassed(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, msg.clone())
            }
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
        });

        (status, body).into_response()
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
