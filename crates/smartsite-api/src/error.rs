//! Startup errors and the mapping of domain errors onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use smartsite_core::error::DomainError;
use thiserror::Error;

/// Errors that stop the service from starting or serving.
#[derive(Debug, Error)]
pub enum AppError {
    /// An environment variable is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connecting to PostgreSQL failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying the schema migrations failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Tracing or OTLP export could not be installed.
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// Rebuilding the database from the event log failed.
    #[error("restore error: {0}")]
    Restore(#[from] DomainError),

    /// Binding or serving on the socket failed.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Stable, machine-readable code.
    pub error: &'static str,
    /// The rendered domain error.
    pub message: String,
}

/// A [`DomainError`] leaving through the HTTP layer.
#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

/// Status and error code a domain error is reported with.
fn classify(err: &DomainError) -> (StatusCode, &'static str) {
    match err {
        DomainError::AggregateNotFound(_) => (StatusCode::NOT_FOUND, "aggregate_not_found"),
        DomainError::ConcurrencyConflict { .. } => (StatusCode::CONFLICT, "concurrency_conflict"),
        DomainError::PreconditionViolation(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "precondition_violated")
        }
        DomainError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        DomainError::BusinessTransaction(_) => {
            (StatusCode::BAD_REQUEST, "business_transaction_error")
        }
        DomainError::RestoreAheadOfOnline { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "restore_in_progress")
        }
        DomainError::MapperNotFound(_)
        | DomainError::AmbiguousMapper { .. }
        | DomainError::Infrastructure(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "infrastructure_error")
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = classify(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, code = error, "Request failed");
        } else {
            tracing::debug!(error = %self.0, code = error, "Request rejected");
        }
        let body = ErrorBody {
            error,
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
