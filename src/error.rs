use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Main error type for the test kit
#[derive(Debug, thiserror::Error)]
pub enum TestkitError {
    #[error("database unreachable, retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("provisioning deadline of {deadline:?} exceeded after {attempts} attempts: {last_error}")]
    DeadlineExceeded {
        deadline: Duration,
        attempts: u32,
        last_error: String,
    },

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to begin transaction: {0}")]
    BeginTransaction(#[source] sqlx::Error),

    #[error("Transaction scope {0} is already terminated")]
    ScopeTerminated(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::migrate::MigrateError> for TestkitError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Migration(err.to_string())
    }
}

/// Error response body, shared by test routers and response assertions
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

impl TestkitError {
    /// Provisioning errors stop the test run; nothing retries them further.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::RetriesExhausted { .. }
                | Self::DeadlineExceeded { .. }
                | Self::Migration(_)
                | Self::Config(_)
        )
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) | Self::Token(_) => StatusCode::UNAUTHORIZED,
            Self::RetriesExhausted { .. } | Self::DeadlineExceeded { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Migration(_)
            | Self::Config(_)
            | Self::BeginTransaction(_)
            | Self::ScopeTerminated(_)
            | Self::Database(_)
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            message: self.to_string(),
        }
    }
}

impl IntoResponse for TestkitError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::warn!(
            error = %self,
            status = %status.as_u16(),
            "Test request failed"
        );

        (status, Json(self.to_response())).into_response()
    }
}

pub type TestkitResult<T> = Result<T, TestkitError>;
