//! Structured logging initialization.
//!
//! The RUST_LOG environment variable takes precedence over the configured
//! level.

use crate::config::{LogFormat, LoggingConfig};
use tracing::Subscriber;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Install the global subscriber.
///
/// Returns false if a subscriber was already installed, in which case the
/// existing one is kept.
///
/// # Example
///
/// ```ignore
/// use vcl_io::config::LoggingConfig;
/// use vcl_io::logging;
///
/// logging::init(&LoggingConfig::default());
/// tracing::info!("worker starting");
/// ```
pub fn init(config: &LoggingConfig) -> bool {
    tracing_subscriber::registry()
        .with(filter(config))
        .with(format_layer(config))
        .try_init()
        .is_ok()
}

fn filter(config: &LoggingConfig) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(config.level.as_str())
    }
}

/// Output layer for the configured format.
fn format_layer<S>(config: &LoggingConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = fmt::layer()
        .with_target(config.target)
        .with_thread_names(config.thread_names);
    match config.format {
        LogFormat::Pretty if config.timestamps => layer.with_ansi(true).boxed(),
        LogFormat::Pretty => layer.with_ansi(true).without_time().boxed(),
        LogFormat::Compact if config.timestamps => layer.compact().with_ansi(true).boxed(),
        LogFormat::Compact => layer.compact().with_ansi(true).without_time().boxed(),
        LogFormat::Json if config.timestamps => layer.json().boxed(),
        LogFormat::Json => layer.json().without_time().boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig {
            format: LogFormat::Compact,
            timestamps: false,
            ..Default::default()
        };
        init(&config);
        assert!(!init(&config));
        tracing::debug!("logging initialized");
    }

    #[test]
    fn test_every_format_builds() {
        for format in [LogFormat::Pretty, LogFormat::Compact, LogFormat::Json] {
            for timestamps in [true, false] {
                let config = LoggingConfig {
                    format,
                    timestamps,
                    ..Default::default()
                };
                let subscriber = tracing_subscriber::registry()
                    .with(filter(&config))
                    .with(format_layer(&config));
                tracing::subscriber::with_default(subscriber, || {
                    tracing::info!(?format, timestamps, "formatted");
                });
            }
        }
    }
}
