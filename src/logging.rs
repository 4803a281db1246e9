//! Tracing setup for hosts that do not install their own subscriber.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Default filter when neither the argument nor `RUST_LOG` is set.
pub const DEFAULT_FILTER: &str = "info";

/// Noisy dependencies capped below the base level.
const QUIET_TARGETS: &[(&str, &str)] = &[("mysql_async", "warn"), ("rusqlite", "warn")];

/// Error returned when the filter does not parse or a global subscriber is
/// already installed.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid tracing filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

fn build_env_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    let mut directives = vec![level.to_string()];
    for (target, lvl) in QUIET_TARGETS {
        directives.push(format!("{}={}", target, lvl));
    }

    let filter = directives.join(",");
    EnvFilter::try_new(&filter).map_err(|e| LoggingError::InvalidFilter {
        filter,
        reason: e.to_string(),
    })
}

/// Install a console `fmt` subscriber.
///
/// `filter` takes precedence over `RUST_LOG`; with neither set the level is
/// `info`. Span close events carry elapsed time.
pub fn init_logging(filter: Option<&str>) -> Result<(), LoggingError> {
    let level = match filter {
        Some(filter) => filter.to_string(),
        None => std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(build_env_filter(&level)?);

    tracing_subscriber::registry()
        .with(console_layer)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    tracing::trace!(filter = %level, "logging initialized");
    Ok(())
}
