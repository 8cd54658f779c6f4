//! Logging bootstrap.
//!
//! Code throughout the workspace logs through the `log` facade; this module
//! wires those macros into a `tracing` subscriber with a non-blocking
//! console sink and an optional daily-rolling file sink.

use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_LEVEL: &str = "info";

static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Writer guards must outlive the process or buffered lines are lost.
static GUARDS: Lazy<Mutex<Vec<WorkerGuard>>> = Lazy::new(|| Mutex::new(Vec::new()));

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub enabled: bool,
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: DEFAULT_LEVEL.to_string(),
            file: None,
        }
    }
}

impl LoggerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: impl AsRef<str>) -> Self {
        self.level = level.as_ref().into();
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Default setup for one of the pipeline binaries: console always,
    /// daily-rolling file under `logs/`.
    pub fn for_app(process: &str) -> Self {
        Self::default().with_file(Path::new("logs").join(format!("weather.{process}.log")))
    }

    pub fn init(self) -> Result<(), Box<dyn std::error::Error>> {
        init_logger(self)
    }
}

pub fn is_logging_disabled() -> bool {
    let value = std::env::var("DISABLE_LOGS").unwrap_or_default();
    crate::config::parse_bool(&value)
}

pub fn init_logger(config: LoggerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if !config.enabled || is_logging_disabled() {
        let _ = LOGGER_INITIALIZED.swap(true, Ordering::SeqCst);
        return Ok(());
    }
    if LOGGER_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::warn!("Logger already initialized, skipping re-initialization");
        return Ok(());
    }

    let _ = LogTracer::builder()
        .with_max_level(log::LevelFilter::Trace)
        .init();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL));

    let (console_writer, console_guard) = tracing_appender::non_blocking(std::io::stderr());
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(console_writer);

    let file_layer = match &config.file {
        None => None,
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let prefix = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("weather");
            let appender = tracing_appender::rolling::Builder::new()
                .rotation(Rotation::DAILY)
                .filename_prefix(prefix)
                .filename_suffix("log")
                .build(path.parent().unwrap_or_else(|| Path::new(".")))?;
            let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
            if let Ok(mut guards) = GUARDS.lock() {
                guards.push(file_guard);
            }
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(file_writer),
            )
        }
    };

    if let Ok(mut guards) = GUARDS.lock() {
        guards.push(console_guard);
    }

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_config_builder() {
        let config = LoggerConfig::new().with_level("debug").with_file("x.log");
        assert_eq!(config.level, "debug");
        assert!(config.file.is_some());
    }

    #[test]
    fn test_for_app_names_file_after_process() {
        let config = LoggerConfig::for_app("fetcher");
        let path = config.file.unwrap();
        assert!(path.to_string_lossy().contains("weather.fetcher.log"));
    }

    #[test]
    fn test_init_is_idempotent() {
        let _ = init_logger(LoggerConfig::new());
        let _ = init_logger(LoggerConfig::new());
        log::info!("logging initialized twice without panic");
    }
}
