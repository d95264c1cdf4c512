use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ConfigError, LogFormat, LogLevel};

/// Initialize structured logging to stderr, keeping stdout free for
/// compiled rule output.
///
/// - `LogFormat::Json`: flattened JSON (log aggregator compatible).
/// - `LogFormat::Text`: human-readable colored output (development).
///
/// Uses `RUST_LOG` env var if set, otherwise falls back to the given
/// `level`. Must be called exactly once at startup.
pub fn init_logging(level: LogLevel, format: LogFormat) -> Result<(), ConfigError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_ansi(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }

    Ok(())
}
