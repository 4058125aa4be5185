use anyhow::{Context, Result};
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::domain::models::LoggingConfig;

const LOG_FILE_NAME: &str = "maestro.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Keeps the file writer flushing until dropped.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggerGuard {
    file_guard: Option<WorkerGuard>,
}

impl LoggerGuard {
    /// Whether a rotating log file is attached.
    pub fn writes_file(&self) -> bool {
        self.file_guard.is_some()
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` directives override the configured level. Fails if a global
/// subscriber is already set.
pub fn init(config: &LoggingConfig) -> Result<LoggerGuard> {
    let default_level = parse_log_level(&config.level)?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let mut layers: Vec<BoxedLayer> = vec![stderr_layer(&config.format)];

    let file_guard = match config.log_dir.as_deref() {
        Some(dir) => {
            let appender = file_appender(dir, &config.rotation)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            // File output is always JSON.
            layers.push(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_current_span(true)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(
        level = %config.level,
        format = %config.format,
        file_output = config.log_dir.is_some(),
        "logger initialized"
    );

    Ok(LoggerGuard {
        file_guard,
    })
}

fn stderr_layer(format: &str) -> BoxedLayer {
    if format == "json" {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_current_span(true)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .boxed()
    }
}

fn file_appender(dir: &str, rotation: &str) -> Result<RollingFileAppender> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create log directory {dir}"))?;
    let appender = match rotation {
        "hourly" => rolling::hourly(dir, LOG_FILE_NAME),
        "never" => rolling::never(dir, LOG_FILE_NAME),
        "daily" => rolling::daily(dir, LOG_FILE_NAME),
        other => anyhow::bail!("Invalid log rotation: {other}"),
    };
    Ok(appender)
}

/// Parse log level string to Level
fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("Invalid log level: {level}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("WARN"), Ok(Level::WARN)));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_file_appender_rejects_unknown_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();
        assert!(file_appender(&path, "weekly").is_err());
        assert!(file_appender(&path, "never").is_ok());
    }

    #[test]
    fn test_init_with_file_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            log_dir: Some(dir.path().join("logs").to_string_lossy().to_string()),
            rotation: "never".to_string(),
            ..LoggingConfig::default()
        };

        // Only one test in this binary installs the global subscriber.
        let guard = init(&config).unwrap();
        assert!(guard.writes_file());
        assert!(dir.path().join("logs").is_dir());
        assert!(init(&config).is_err(), "a second global subscriber is refused");
    }
}
