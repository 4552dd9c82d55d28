//! Logging setup for the `geoetl` binary.
//!
//! Logs go to the console and to daily-rolling files in the platform data
//! directory. The library itself only emits `tracing` events; installing a
//! subscriber is left to the embedding program.
//!
//! ```no_run
//! geoetl::logging::init().expect("Failed to initialize logging");
//! tracing::info!("started");
//! ```

use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};
use tracing::Subscriber;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, fmt, layer::SubscriberExt as _, registry::LookupSpan,
    util::SubscriberInitExt as _,
};

/// Gets the log directory path based on platform conventions
///
/// Returns:
/// - Windows: `%APPDATA%/geoetl/logs`
/// - macOS: `~/Library/Application Support/geoetl/logs`
/// - Linux: `~/.local/share/geoetl/logs`
pub fn get_log_dir() -> Result<PathBuf> {
    let base_dir = dirs::data_dir().context("Failed to determine data directory")?;
    let log_dir = base_dir.join("geoetl").join("logs");

    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    }

    Ok(log_dir)
}

fn env_filter() -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Failed to create env filter")
}

/// Daily-rolling appender keeping the last ten files named `<prefix>.<date>.log`.
fn rolling_appender(log_dir: &Path, prefix: &str) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(10)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .build(log_dir)
        .with_context(|| format!("Failed to create {prefix} log file appender"))
}

fn file_layer<S>(writer: RollingFileAppender) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false)
        .with_writer(writer)
}

/// Console plus two rolling files: `geoetl.log` (everything the filter
/// lets through) and `error.log` (warnings and errors).
///
/// # Errors
///
/// Returns error if the log directory cannot be created or an appender
/// cannot be built.
pub fn init() -> Result<()> {
    let log_dir = get_log_dir()?;
    let all_logs = rolling_appender(&log_dir, "geoetl")?;
    let error_logs = rolling_appender(&log_dir, "error")?;

    tracing_subscriber::registry()
        .with(env_filter()?)
        .with(fmt::layer().with_target(false).compact())
        .with(file_layer(all_logs))
        .with(file_layer(error_logs).with_filter(EnvFilter::new("warn")))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::debug!("Logging initialized, log directory: {}", log_dir.display());
    Ok(())
}

/// Console-only logging, for when the log directory is unavailable.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_console() -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter()?)
        .with(fmt::layer().with_target(false).compact())
        .try_init()
        .context("Failed to install tracing subscriber")
}
