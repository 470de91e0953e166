//! Logging configuration for ragserve

use std::path::Path;

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Registry;

use crate::config::LoggingConfig;
use crate::Result;

const LOG_FILE_PREFIX: &str = "ragserve.log";

/// Initialize logging with configuration
///
/// Console output goes to stderr, and a daily-rolling file is written under
/// `config.dir`. `RUST_LOG` is honoured when no configuration is given.
/// `level_override` wins over both (used by `--verbose`).
pub fn init_logging_with_config(
    config: Option<&LoggingConfig>,
    level_override: Option<&str>,
) -> Result<()> {
    let dir = config.map_or("logs", |c| c.dir.as_str());
    let logs_dir = Path::new(dir);
    if !logs_dir.exists() {
        std::fs::create_dir_all(logs_dir)?;
    }

    let level = level_override.or_else(|| config.map(|c| c.level.as_str()));
    let env_filter = match level {
        Some(level) => EnvFilter::new(format!("{level},ragserve={level}")),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,ragserve=debug")),
    };

    if config.is_some_and(|c| c.backtrace) && std::env::var_os("RUST_BACKTRACE").is_none() {
        std::env::set_var("RUST_BACKTRACE", "1");
    }

    let file_appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(non_blocking)
        .with_ansi(false); // No colors in file

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| crate::RagError::Custom(format!("Failed to install subscriber: {e}")))?;

    tracing::info!(
        "Logging initialized with level: {} - console and file output enabled",
        level.unwrap_or("from environment")
    );
    tracing::info!(
        "Log files will be saved to: {}/{}.YYYY-MM-DD",
        dir,
        LOG_FILE_PREFIX
    );

    // The writer thread lives for the whole process
    std::mem::forget(guard);

    Ok(())
}

/// Initialize simple console logging for tests and one-shot commands
pub fn init_simple_logging(level: tracing::Level) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| crate::RagError::Custom(format!("Failed to install subscriber: {e}")))?;
    Ok(())
}
