//! Log output for the segment client
//!
//! Nothing is recorded until [`init`] runs. The CLI calls it for `--verbose`;
//! applications embedding the library usually install their own subscriber.
//!
//! Files roll daily in `$XDG_STATE_HOME/segment/` as `segment.log.YYYY-MM-DD`.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "segment.log";

/// Install a file subscriber.
///
/// `RUST_LOG` wins over `config.level`. The configured level applies to
/// this crate and the CLI only; HTTP and runtime crates stay at `warn`.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => default_filter(&config.level)?,
    };

    let log_dir = log_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(config.max_files.max(1))
        .build(&log_dir)
        .map_err(|e| Error::Config(format!("failed to create log appender: {}", e)))?;
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    // Thread names tell caller-side rejections apart from the
    // segment-transporter worker.
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true)
                .with_line_number(true),
        )
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {}", e)))?;

    tracing::info!(log_dir = %log_dir.display(), level = %config.level, "Logging initialized");

    Ok(LoggingGuard { _guard: guard })
}

/// Send logs to the test harness output; repeated calls are ignored.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_thread_names(true)
        .try_init();
}

/// Flushes buffered log lines when dropped; hold it for the life of the process.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Directory holding the rolling log files
pub fn log_dir() -> PathBuf {
    Config::state_dir()
}

fn default_directives(level: &str) -> String {
    format!("warn,segment_core={level},segment={level}")
}

fn default_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(default_directives(level))
        .map_err(|e| Error::Config(format!("invalid log level {:?}: {}", level, e)))
}
