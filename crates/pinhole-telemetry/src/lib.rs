//! Logging setup shared by the Pinhole binaries.

use thiserror::Error;
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to install log bridge: {0}")]
    LogBridge(#[from] tracing_log::log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Installs the global subscriber.
///
/// Events go to stderr, filtered by `RUST_LOG` (default [`DEFAULT_FILTER`]).
/// Records emitted through the `log` facade are forwarded as well.
/// Fails if a subscriber or logger was already installed.
pub fn init(format: LogFormat) -> Result<(), TelemetryError> {
    LogTracer::init()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_writer(std::io::stderr)),
        )?,
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_writer(std::io::stderr)),
        )?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // The subscriber is process-global, so one test covers both calls.
    #[test]
    fn init_installs_once() {
        init(LogFormat::Json).unwrap();
        tracing::info!(target: "pinhole", "telemetry ready");

        assert!(matches!(
            init(LogFormat::Text),
            Err(TelemetryError::LogBridge(_))
        ));
    }
}
