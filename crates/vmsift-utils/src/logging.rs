//! # Logging Utilities
//!
//! Subscriber setup for vmsift built on `tracing-subscriber`.
//!
//! Events raised while walking an image (walker construction, version
//! selection, corrupt data) are plain `tracing` events. Nothing is printed
//! until one of the initialisers below installs a subscriber.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vmsift_utils::init_logging;
//!
//! // Keep the guard alive for as long as file output is wanted
//! let _guard = init_logging().expect("Failed to initialize logging");
//! tracing::info!("analysis started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: level filter (e.g. `RUST_LOG=debug`, `RUST_LOG=vmsift_core=trace`)
//! - `VMSIFT_LOG_FORMAT`: `json` or `pretty` (default: `pretty`)
//! - `VMSIFT_LOG_FILE`: optional file receiving a copy of the console output

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "VMSIFT_LOG_FORMAT";
/// Environment variable naming an extra log file.
pub const LOG_FILE_ENV: &str = "VMSIFT_LOG_FILE";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level (corrupt data is reported here)
    Warn,
    /// Info level (default)
    Info,
    /// Debug level
    Debug,
    /// Trace level (per heap section and per step)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Keeps background file writers flushing
///
/// Dropping the guard flushes and stops file output. Console output is
/// unaffected.
#[derive(Debug, Default)]
#[must_use = "file output stops when the guard is dropped"]
pub struct LoggingGuard
{
    file: Option<WorkerGuard>,
}

impl LoggingGuard
{
    /// Whether a log file is being written.
    pub fn writes_file(&self) -> bool
    {
        self.file.is_some()
    }
}

/// Initialize logging from the environment
///
/// `RUST_LOG` picks the filter (default `info`), `VMSIFT_LOG_FORMAT` the
/// format and `VMSIFT_LOG_FILE` an optional file receiving the same events.
///
/// ## Errors
///
/// Returns an error if a subscriber is already installed or `VMSIFT_LOG_FORMAT`
/// is not a known format.
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    let format = match env::var(LOG_FORMAT_ENV) {
        Ok(value) => value.parse()?,
        Err(_) => LogFormat::default(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));
    let file = env::var(LOG_FILE_ENV).ok().map(PathBuf::from);
    install(format, filter, true, file.as_deref())
}

/// Initialize console logging with an explicit level and format
///
/// ## Example
///
/// ```rust,no_run
/// use vmsift_utils::{LogFormat, LogLevel, init_logging_with_level};
///
/// let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Pretty)
///     .expect("Failed to initialize logging");
/// ```
///
/// ## Errors
///
/// Returns an error if a subscriber is already installed.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    install(format, EnvFilter::new(Level::from(level).to_string()), true, None)
}

/// Initialize logging to `path` only, leaving stdout untouched
///
/// Useful when the embedding program owns the terminal. Without an explicit
/// level, `RUST_LOG` is honoured and `info` is the fallback.
///
/// ## Errors
///
/// Returns an error if the file's directory cannot be created or a
/// subscriber is already installed.
pub fn init_logging_to_file(path: &Path, level: Option<LogLevel>, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let filter = match level {
        Some(level) => EnvFilter::new(Level::from(level).to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
    };
    install(format, filter, false, Some(path))
}

/// Dated log file path inside `directory`, e.g. `2026-10-16-vmsift.log`.
pub fn dated_log_file(directory: &Path) -> PathBuf
{
    directory.join(format!("{}-vmsift.log", Utc::now().format("%Y-%m-%d")))
}

fn install(format: LogFormat, filter: EnvFilter, console: bool, file: Option<&Path>) -> Result<LoggingGuard, LoggingError>
{
    let mut layers: Vec<BoxedLayer> = Vec::new();
    if console {
        layers.push(console_layer(format, filter.clone()));
    }

    let mut guard = LoggingGuard::default();
    if let Some(path) = file {
        let (layer, worker) = file_layer(path, format, filter)?;
        layers.push(layer);
        guard.file = Some(worker);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok(guard)
}

fn console_layer(format: LogFormat, filter: EnvFilter) -> BoxedLayer
{
    let layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(io::stderr);
    match format {
        LogFormat::Pretty => layer.with_ansi(true).with_filter(filter).boxed(),
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    }
}

fn file_layer(path: &Path, format: LogFormat, filter: EnvFilter) -> Result<(BoxedLayer, WorkerGuard), LoggingError>
{
    let name = path
        .file_name()
        .ok_or_else(|| LoggingError::InvalidPath(path.to_path_buf()))?;
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    let appender = tracing_appender::rolling::never(directory, name);
    let (writer, worker) = tracing_appender::non_blocking(appender);

    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_ansi(false);
    let layer = match format {
        LogFormat::Pretty => layer.with_filter(filter).boxed(),
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    };
    Ok((layer, worker))
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("invalid log format: {0} (use 'pretty' or 'json')")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    /// Log file path without a file name
    #[error("invalid log file path: {}", .0.display())]
    InvalidPath(PathBuf),

    /// A subscriber is already installed
    #[error("failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("file logging error: {0}")]
    FileError(#[from] io::Error),
}
