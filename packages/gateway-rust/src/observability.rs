//! Tracing bootstrap and the cache-status response header.

use http::{HeaderName, HeaderValue};
use inventory_core::RequestContext;
use serde::Deserialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_LOG_FILTER: &str = "inventory_gateway=info";

/// Response header carrying the request's [`CacheStatus`](inventory_core::CacheStatus).
pub static CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-cache-status");

/// Output format of the process-wide log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Installs the global `tracing` subscriber, filtered by `RUST_LOG` or
/// [`DEFAULT_LOG_FILTER`].
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed; the existing
/// one stays in place.
pub fn init_tracing(format: LogFormat) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let (json, text) = match format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Text => (None, Some(tracing_subscriber::fmt::layer().with_target(false))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .try_init()
}

/// The cache-status header for a completed request.
#[must_use]
pub fn cache_status_header(ctx: &RequestContext) -> (HeaderName, HeaderValue) {
    (
        CACHE_STATUS_HEADER.clone(),
        HeaderValue::from_static(ctx.cache_status().as_str()),
    )
}

#[cfg(test)]
mod tests {
    use inventory_core::CacheStatus;

    use super::*;

    #[test]
    fn header_defaults_to_bypass() {
        let (name, value) = cache_status_header(&RequestContext::new());
        assert_eq!(name.as_str(), "x-cache-status");
        assert_eq!(value, "BYPASS");
    }

    #[test]
    fn header_reflects_cache_outcome() {
        let ctx = RequestContext::new();
        ctx.set_cache_status(CacheStatus::Hit);
        assert_eq!(cache_status_header(&ctx).1, "HIT");
    }

    #[test]
    fn second_init_is_rejected_not_fatal() {
        let _ = init_tracing(LogFormat::Json);
        assert!(init_tracing(LogFormat::Text).is_err());
    }

    #[test]
    fn log_format_deserializes_lowercase() {
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
    }
}
