//! Translation of transport statuses into domain errors.
//!
//! [`map_status`] is the single place where a `tonic::Status` becomes a
//! [`GatewayError`]. [`is_retryable`] is a separate, narrower classification
//! used by the retry interceptor.

use tonic::{Code, Status};

use crate::error::{FieldViolation, GatewayError};

/// Field name used for validation failures reported by the remote service,
/// which does not say which field was rejected.
pub const VALIDATION_FIELD: &str = "request";

/// Code attached to validation failures reported by the remote service.
pub const VALIDATION_CODE: &str = "invalid_argument";

const CONFLICT_MARKERS: [&str; 2] = ["cannot update", "cannot delete"];

/// Maps a transport status to exactly one domain error kind.
///
/// | status              | domain error                                   |
/// |---------------------|------------------------------------------------|
/// | not-found           | `NotFound`                                     |
/// | failed-precondition | `Conflict` if the message says "cannot update" or "cannot delete" |
/// | invalid-argument    | `ValidationFailed` with one violation          |
/// | unavailable         | `Unavailable`                                  |
/// | deadline-exceeded   | `Timeout`                                      |
/// | anything else       | `Rpc` (unchanged)                              |
#[must_use]
pub fn map_status(status: Status) -> GatewayError {
    match status.code() {
        Code::NotFound => GatewayError::NotFound,
        Code::FailedPrecondition if is_conflict_message(status.message()) => {
            GatewayError::Conflict {
                reason: status.message().to_string(),
            }
        }
        Code::InvalidArgument => GatewayError::ValidationFailed(vec![FieldViolation {
            field: VALIDATION_FIELD.to_string(),
            message: status.message().to_string(),
            code: VALIDATION_CODE.to_string(),
        }]),
        Code::Unavailable => GatewayError::Unavailable,
        Code::DeadlineExceeded => GatewayError::Timeout,
        _ => GatewayError::Rpc(status),
    }
}

/// Maps the error side of a transport result; successes pass through untouched.
///
/// # Errors
///
/// Returns the mapped domain error when `result` is an `Err`.
pub fn map_result<T>(result: Result<T, Status>) -> Result<T, GatewayError> {
    result.map_err(map_status)
}

/// Whether a failed call may succeed if attempted again.
///
/// Only unavailable, resource-exhausted, and aborted are transient.
/// Everything else, including not-found, invalid-argument, and
/// deadline-exceeded, is permanent.
#[must_use]
pub fn is_retryable(status: &Status) -> bool {
    matches!(
        status.code(),
        Code::Unavailable | Code::ResourceExhausted | Code::Aborted
    )
}

fn is_conflict_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    CONFLICT_MARKERS.iter().any(|marker| lowered.contains(marker))
}
