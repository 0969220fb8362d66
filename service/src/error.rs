//! HTTP error type.
//!
//! Bridges the domain errors to `{code, message}` JSON responses. Every
//! domain error is classified by its [`ErrorKind`]; a few get a more specific
//! machine-readable code. 5xx responses never leak internals: the client sees
//! a generic message and the source is logged.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bilheteria_core::{ErrorKind, StoreError};
use bilheteria_core::cancellation::CancelError;
use bilheteria_core::checkout::CheckoutError;
use bilheteria_core::issuer::IssueError;
use bilheteria_core::ledger::{LedgerError, ReserveError};
use bilheteria_core::validation::ValidationError;
use serde::Serialize;
use std::fmt;

/// Application error type for HTTP handlers.
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            source: None,
        }
    }

    /// Attach the underlying error (logged, never sent).
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// 400 Bad Request
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// 404 Not Found
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", format!("{resource} {id} not found"))
    }

    /// 409 Conflict
    #[must_use]
    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    /// 422 Unprocessable Entity
    #[must_use]
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, code, message)
    }

    /// 500 with the cause attached for the logs
    #[must_use]
    pub fn internal(source: impl Into<anyhow::Error>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
        .with_source(source.into())
    }

    /// 503 Service Unavailable
    #[must_use]
    pub fn unavailable(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, code, message)
    }

    /// Generic mapping by category, used when no specific code applies.
    fn from_kind<E>(kind: ErrorKind, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match kind {
            ErrorKind::Validation => Self::validation("VALIDATION_ERROR", err.to_string()),
            ErrorKind::NotFound => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
            ErrorKind::Conflict => Self::conflict("CONFLICT", err.to_string()),
            ErrorKind::Transient => {
                Self::unavailable("SERVICE_UNAVAILABLE", "Service temporarily unavailable, retry shortly")
                    .with_source(anyhow::Error::new(err))
            }
            ErrorKind::InvariantViolation => Self::internal(err),
        }
    }

    /// HTTP status
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(status = %self.status, code = self.code, message = %self.message, "Request failed"),
            }
        } else {
            tracing::debug!(status = %self.status, code = self.code, message = %self.message, "Request refused");
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err)
    }
}

impl From<ReserveError> for AppError {
    fn from(err: ReserveError) -> Self {
        match err {
            ReserveError::Insufficient { .. } => Self::conflict("INSUFFICIENT", err.to_string()),
            ReserveError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
            ReserveError::WindowClosed(_) => Self::validation("WINDOW_CLOSED", err.to_string()),
            ReserveError::InvalidQuantity { .. } => Self::bad_request(err.to_string()),
            ReserveError::Store(_) => Self::from_kind(err.kind(), err),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        Self::from_kind(err.kind(), err)
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        Self::from_kind(err.kind(), err)
    }
}

impl From<IssueError> for AppError {
    fn from(err: IssueError) -> Self {
        match err {
            IssueError::NotHeld { .. } => Self::conflict("RESERVATION_NOT_HELD", err.to_string()),
            IssueError::PaymentNotApproved(_) => {
                Self::new(StatusCode::PAYMENT_REQUIRED, "PAYMENT_NOT_APPROVED", err.to_string())
            }
            IssueError::AmountMismatch { .. } => Self::validation("AMOUNT_MISMATCH", err.to_string()),
            IssueError::PaymentRefConflict(_) => Self::conflict("PAYMENT_REF_CONFLICT", err.to_string()),
            IssueError::ForeignPayment { .. } => Self::conflict("PAYMENT_MISMATCH", err.to_string()),
            other => Self::from_kind(other.kind(), other),
        }
    }
}

impl From<CheckoutError> for AppError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::NotHeld { .. } => Self::conflict("RESERVATION_NOT_HELD", err.to_string()),
            CheckoutError::PaymentNotApproved { .. } => {
                Self::new(StatusCode::PAYMENT_REQUIRED, "PAYMENT_NOT_APPROVED", err.to_string())
            }
            CheckoutError::Gateway(ref gateway) if gateway.is_transient() => {
                Self::unavailable("GATEWAY_UNAVAILABLE", err.to_string())
            }
            CheckoutError::Gateway(ref gateway) if gateway.kind() == ErrorKind::Validation => {
                Self::new(StatusCode::BAD_GATEWAY, "PAYMENT_REJECTED", err.to_string())
            }
            CheckoutError::ForeignPayment { .. } => Self::conflict("PAYMENT_MISMATCH", err.to_string()),
            CheckoutError::Issue(issue) => issue.into(),
            CheckoutError::Ledger(ledger) => ledger.into(),
            other => Self::from_kind(other.kind(), other),
        }
    }
}

impl From<CancelError> for AppError {
    fn from(err: CancelError) -> Self {
        match err {
            CancelError::InvalidTransition(_) => Self::conflict("INVALID_TRANSITION", err.to_string()),
            other => Self::from_kind(other.kind(), other),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        Self::from_kind(err.kind(), err)
    }
}
