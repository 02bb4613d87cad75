//! Structured Logger
//!
//! Wraps `tracing` to provide plain or JSON console output, daily file
//! rotation (NDJSON), and environment-based level control.

use mdforge_config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log files are written as `mdforge.log.YYYY-MM-DD`.
pub const LOG_FILE_PREFIX: &str = "mdforge.log";

const DEFAULT_LEVEL: &str = "info";

/// Keeps the file writer flushing. Hold it until the program exits.
#[must_use]
pub struct LoggerGuard {
    _file: Option<WorkerGuard>,
}

/// `RUST_LOG` wins; otherwise the configured level, otherwise `info`.
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = config.level.as_deref().unwrap_or(DEFAULT_LEVEL);
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
    })
}

/// Initialize the global structured logger.
///
/// Console logs go to stderr so command output on stdout stays clean. A
/// second call leaves the first subscriber in place.
pub fn init_logger(config: &LoggingConfig) -> LoggerGuard {
    let env_filter = build_filter(config);
    let json = config.json.unwrap_or(false);

    let console_layer = if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_ansi(true)
            .boxed()
    };

    let (file_layer, file_guard) = match &config.directory {
        Some(dir) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    LoggerGuard { _file: file_guard }
}
