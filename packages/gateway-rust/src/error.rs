//! Domain error taxonomy surfaced by every pipeline entry point.
//!
//! Transport statuses are translated into these kinds by
//! [`crate::rpc::status::map_status`]; nothing else crosses the pipeline
//! boundary toward callers.

use tonic::Code;

use crate::breaker::ErrorClass;

/// A single rejected field in a validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
    pub code: String,
}

/// Errors returned by handlers and the pipeline around them.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("resource not found")]
    NotFound,
    #[error("conflict: {reason}")]
    Conflict { reason: String },
    #[error("validation failed: {}", summarize(.0))]
    ValidationFailed(Vec<FieldViolation>),
    #[error("inventory service unavailable")]
    Unavailable,
    #[error("inventory service call timed out")]
    Timeout,
    #[error("circuit breaker is open")]
    CircuitOpen,
    #[error("too many requests while circuit breaker is half-open")]
    TooManyRequests,
    /// Transport status with no domain mapping.
    #[error("inventory service error: {}: {}", .0.code(), .0.message())]
    Rpc(tonic::Status),
}

fn summarize(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl GatewayError {
    /// Stable snake-case label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::ValidationFailed(_) => "validation_failed",
            Self::Unavailable => "unavailable",
            Self::Timeout => "timeout",
            Self::CircuitOpen => "circuit_open",
            Self::TooManyRequests => "too_many_requests",
            Self::Rpc(_) => "rpc",
        }
    }

    /// Whether the remote dependency, not the caller's request, is at fault.
    ///
    /// Pass-through statuses count only for server-side codes; auth,
    /// precondition and similar codes describe the request.
    #[must_use]
    pub fn is_dependency_failure(&self) -> bool {
        match self {
            Self::Unavailable | Self::Timeout => true,
            Self::Rpc(status) => matches!(
                status.code(),
                Code::Unavailable
                    | Code::DeadlineExceeded
                    | Code::Internal
                    | Code::Unknown
                    | Code::ResourceExhausted
                    | Code::Aborted
            ),
            Self::NotFound
            | Self::Conflict { .. }
            | Self::ValidationFailed(_)
            | Self::CircuitOpen
            | Self::TooManyRequests => false,
        }
    }

    /// How the inventory client's circuit breaker counts this error.
    ///
    /// Caller cancellation carries no verdict on the dependency and is
    /// ignored; other non-dependency errors prove the dependency answered.
    #[must_use]
    pub fn breaker_class(&self) -> ErrorClass {
        match self {
            Self::Rpc(status) if status.code() == Code::Cancelled => ErrorClass::Ignore,
            err if err.is_dependency_failure() => ErrorClass::Failure,
            _ => ErrorClass::Success,
        }
    }
}

/// Rejections produced by the circuit breaker before the wrapped call runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BreakerError {
    #[error("circuit breaker is open")]
    Open,
    #[error("too many requests while circuit breaker is half-open")]
    TooManyRequests,
}

impl From<BreakerError> for GatewayError {
    fn from(err: BreakerError) -> Self {
        match err {
            BreakerError::Open => Self::CircuitOpen,
            BreakerError::TooManyRequests => Self::TooManyRequests,
        }
    }
}
