//! Logging initialization.
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` (RUST_LOG wins
//! over the configured level), a compact stderr layer, and an optional
//! JSON-lines file layer.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name recorded at startup so mixed log files can be told apart.
    pub service_name: String,
    /// Level used when RUST_LOG is unset or invalid.
    pub default_level: String,
    /// JSON-lines output file. `None` disables the file layer.
    pub log_path: Option<PathBuf>,
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "guelp".to_string(),
            default_level: "info".to_string(),
            log_path: None,
            also_stderr: true,
        }
    }
}

/// Initialize stderr logging at the given default level.
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("client started");
/// ```
pub fn init_logging(level: &str) {
    init_logging_with(LogConfig {
        default_level: level.to_string(),
        ..Default::default()
    });
}

/// Initialize logging from a full [`LogConfig`].
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging_with(config: LogConfig) {
    let env_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_level))
    };

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(env_filter())
    });

    let mut file_error = None;
    let file_layer = config.log_path.as_ref().and_then(|path| {
        if let Some(parent) = path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                file_error = Some(err);
                return None;
            }
        }
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(env_filter()),
            ),
            Err(err) => {
                file_error = Some(err);
                None
            }
        }
    });

    let installed = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if !installed {
        return;
    }

    if let Some(err) = file_error {
        tracing::warn!(error = %err, "log file unavailable, continuing without it");
    }

    tracing::debug!(
        service = %config.service_name,
        level = %config.default_level,
        "logging initialized"
    );
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
