//! Logging setup for the harness
//!
//! Console output goes to stderr so that the run summary on stdout stays
//! readable. When a log directory is configured, a daily rolling file is written
//! through a non-blocking appender, optionally as JSON lines for ingestion.

use crate::LoadTestError;
use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::Directive, fmt::time::ChronoUtc, layer::SubscriberExt, util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Targets that flood the output during a load test
const NOISY_TARGETS: &[&str] = &[
    "aws_smithy_runtime=warn",
    "aws_smithy_runtime_api=warn",
    "aws_smithy_http=warn",
    "aws_config=warn",
    "aws_credential_types=warn",
    "hyper=warn",
    "h2=warn",
    "rustls=warn",
    "tokio=warn",
];

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory for rolling log files; no file output when absent
    pub log_dir: Option<PathBuf>,
    /// Log level for file output
    pub file_log_level: String,
    /// Log level for console output
    pub console_log_level: String,
    /// Whether file output is written as JSON lines
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            file_log_level: "debug".to_string(),
            console_log_level: "info".to_string(),
            json_format: true,
        }
    }
}

impl LoggingConfig {
    /// Create logging configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(log_dir) = std::env::var("LOADTEST_LOG_DIR") {
            config.log_dir = Some(PathBuf::from(log_dir));
        }

        if let Ok(level) = std::env::var("LOADTEST_LOG_LEVEL") {
            config.console_log_level = level;
        }

        if let Ok(json) = std::env::var("LOADTEST_JSON_LOGS") {
            config.json_format = json.parse().unwrap_or(true);
        }

        config
    }

    /// Override the console level
    pub fn with_console_level(mut self, level: impl Into<String>) -> Self {
        self.console_log_level = level.into();
        self
    }
}

/// Guard that must be kept alive for the duration of the application
/// to ensure proper log flushing
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Build an `EnvFilter` for `level` with the noisy dependency targets capped
fn build_filter(level: &str, fallback: &str) -> Result<EnvFilter, LoadTestError> {
    let mut filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(fallback));

    for target in NOISY_TARGETS {
        let directive: Directive = target.parse().map_err(|e| {
            LoadTestError::configuration_error(format!("Invalid log directive '{}': {}", target, e))
        })?;
        filter = filter.add_directive(directive);
    }

    Ok(filter)
}

/// Initialize logging for the process
pub fn init_logging(config: LoggingConfig) -> Result<LoggingGuard, LoadTestError> {
    let mut file_guard = None;

    let file_layer = match &config.log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir).map_err(|e| {
                LoadTestError::configuration_error(format!(
                    "Failed to create log directory: {}",
                    e
                ))
            })?;

            let file_appender = tracing_appender::rolling::daily(log_dir, "bedrock-loadtest.log");
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            file_guard = Some(guard);

            let file_filter = build_filter(&config.file_log_level, "debug")?;
            let timer = ChronoUtc::new("%Y-%m-%d %H:%M:%S%.3f UTC".to_string());

            let layer = if config.json_format {
                tracing_subscriber::fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .with_timer(timer)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .json()
                    .with_filter(file_filter)
                    .boxed()
            } else {
                tracing_subscriber::fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .with_timer(timer)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_filter(file_filter)
                    .boxed()
            };
            Some(layer)
        }
        None => None,
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_filter(build_filter(&config.console_log_level, "info")?);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| {
            LoadTestError::configuration_error(format!("Failed to install logging: {}", e))
        })?;

    info!(
        log_dir = ?config.log_dir,
        json_format = config.json_format,
        console_level = %config.console_log_level,
        "Logging initialized"
    );

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
