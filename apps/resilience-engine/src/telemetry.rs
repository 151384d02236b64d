//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence over the configured level. The output format
//! is selected by `observability.logging.format`:
//!
//! - `json`: one JSON object per event (default)
//! - `pretty`: multi-line human-readable output
//! - anything else: compact single-line text
//!
//! # Usage
//!
//! ```rust,ignore
//! use resilience_engine::telemetry::init_tracing;
//!
//! init_tracing(&config.observability.logging)?;
//! ```

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use crate::config::LoggingConfig;

/// Error installing the global subscriber.
#[derive(Debug, thiserror::Error)]
#[error("failed to install tracing subscriber: {0}")]
pub struct TelemetryError(String);

/// Build the env filter for a configuration.
///
/// Falls back to `info` when neither `RUST_LOG` nor the configured level parse.
#[must_use]
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = env_filter(config);
    let span_events = if config.include_spans {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(span_events);

    let result = match config.format.as_str() {
        "json" => builder.json().with_current_span(config.include_spans).try_init(),
        "pretty" => builder.pretty().try_init(),
        _ => builder.compact().try_init(),
    };

    result.map_err(|e| TelemetryError(e.to_string()))
}
