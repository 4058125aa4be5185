use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::{AgentKind, Config};

/// Directory, relative to the working directory, holding project config.
pub const CONFIG_DIR: &str = ".maestro";

/// Prefix for environment overrides; nested keys are split on `__`.
pub const ENV_PREFIX: &str = "MAESTRO_";

/// Configuration error types
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid max_concurrent_workflows: {0}. Must be between 1 and 256")]
    InvalidMaxConcurrentWorkflows(usize),

    #[error("Invalid max_parallel_tasks: {0}. Must be at least 1")]
    InvalidMaxParallelTasks(usize),

    #[error("Invalid agent_timeout_secs: {0}. Must be at least 1")]
    InvalidAgentTimeout(u64),

    #[error("Invalid max_review_iterations: {0}. Must be at least 1")]
    InvalidMaxReviewIterations(u32),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Invalid event_channel_capacity: {0}. Must be at least 1")]
    InvalidEventChannelCapacity(usize),

    #[error("agent.command is required when agent.kind is command")]
    MissingAgentCommand,

    #[error("agent.endpoint is required when agent.kind is http")]
    MissingAgentEndpoint,
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the current directory.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `.maestro/config.yaml`
    /// 3. `.maestro/local.yaml` (optional local overrides)
    /// 4. `MAESTRO_*` environment variables
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".")
    }

    /// Same as [`ConfigLoader::load`], rooted at `root` instead of the
    /// working directory.
    pub fn load_from_dir(root: impl AsRef<Path>) -> Result<Config> {
        let dir = root.as_ref().join(CONFIG_DIR);
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file {} does not exist", path.display());
        }
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.max_concurrent_workflows == 0 || config.max_concurrent_workflows > 256 {
            return Err(ConfigError::InvalidMaxConcurrentWorkflows(
                config.max_concurrent_workflows,
            ));
        }
        if config.max_parallel_tasks == 0 {
            return Err(ConfigError::InvalidMaxParallelTasks(config.max_parallel_tasks));
        }
        if config.agent_timeout_secs == 0 {
            return Err(ConfigError::InvalidAgentTimeout(config.agent_timeout_secs));
        }
        if config.max_review_iterations == 0 {
            return Err(ConfigError::InvalidMaxReviewIterations(
                config.max_review_iterations,
            ));
        }

        if config.database.path.trim().is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        if config.server.event_channel_capacity == 0 {
            return Err(ConfigError::InvalidEventChannelCapacity(
                config.server.event_channel_capacity,
            ));
        }

        match config.agent.kind {
            AgentKind::Command if config.agent.command.as_deref().is_none_or(str::is_empty) => {
                return Err(ConfigError::MissingAgentCommand);
            }
            AgentKind::Http if config.agent.endpoint.as_deref().is_none_or(str::is_empty) => {
                return Err(ConfigError::MissingAgentEndpoint);
            }
            _ => {}
        }

        Ok(())
    }
}
