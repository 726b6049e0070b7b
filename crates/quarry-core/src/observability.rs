//! Observability infrastructure for quarry.
//!
//! Structured logging with consistent spans. Every projection operation runs
//! inside a span carrying the customer, query name and correlation id.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `quarry_named_query=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let registry = tracing_subscriber::registry().with(env_filter);
        let result = match format {
            LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
            LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        };
        if result.is_err() {
            tracing::debug!("global subscriber already installed");
        }
    });
}

/// Creates a span for named-query projection operations.
///
/// # Example
///
/// ```rust
/// use quarry_core::observability::projection_span;
///
/// let span = projection_span("get_or_build", "42", "by-manifest");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn projection_span(operation: &str, customer: &str, query: &str) -> Span {
    tracing::info_span!(
        "projection",
        op = operation,
        customer = customer,
        query = query,
        build_id = tracing::field::Empty,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_succeeds() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn test_projection_span_records_build_id() {
        let span = projection_span("get_or_build", "42", "query");
        span.record("build_id", "01HZX");
        let _guard = span.enter();
        tracing::info!("inside projection span");
    }
}
