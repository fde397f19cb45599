//! Logging configuration and initialization
//!
//! Console output (compact or JSON) plus optional non-blocking file output,
//! filtered by `NEON_MIRROR_LOG`, then `RUST_LOG`, then the configured level.
//! `log` records from wgpu and winit arrive through tracing-subscriber's
//! `tracing-log` bridge.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

pub use tracing_appender::non_blocking::WorkerGuard as LogGuard;

/// Filter override, e.g. `debug` or `info,neon_mirror::matte=trace`
pub const LOG_ENV: &str = "NEON_MIRROR_LOG";
/// Set to `json` for JSON console output
pub const LOG_FORMAT_ENV: &str = "NEON_MIRROR_LOG_FORMAT";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub console_enabled: bool,
    pub file_enabled: bool,
    /// Log file location, `neon-mirror.log` in the working directory if unset
    pub file_path: Option<PathBuf>,
    pub json_format: bool,
    /// Filter used when neither environment variable is set
    pub default_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enabled: true,
            file_enabled: false,
            file_path: None,
            json_format: false,
            default_level: "info,wgpu_core=warn,wgpu_hal=warn,naga=warn".to_string(),
        }
    }
}

impl LogConfig {
    pub fn log_file(&self) -> PathBuf {
        self.file_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("neon-mirror.log"))
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open log file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

/// `NEON_MIRROR_LOG_FORMAT=json` wins over the configured format
fn wants_json(env_value: Option<&str>, configured: bool) -> bool {
    env_value
        .map(|v| v.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(configured)
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the program; dropping it
/// flushes and stops the file writer.
pub fn init_logging(config: &LogConfig) -> Result<Option<LogGuard>, LoggingError> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let use_json = wants_json(std::env::var(LOG_FORMAT_ENV).ok().as_deref(), config.json_format);

    let (file_layer, guard) = if config.file_enabled {
        let path = config.log_file();
        let file = std::fs::File::create(&path).map_err(|source| LoggingError::File {
            path: path.clone(),
            source,
        })?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let console_json = (config.console_enabled && use_json).then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
    });
    let console_compact = (config.console_enabled && !use_json).then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_file(false)
            .with_line_number(false)
            .compact()
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_json)
        .with(console_compact)
        .try_init()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        json_format = use_json,
        file_enabled = config.file_enabled,
        "Logging initialized"
    );

    Ok(guard)
}
