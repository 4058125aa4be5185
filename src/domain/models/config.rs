use serde::{Deserialize, Serialize};

/// Main configuration structure for Maestro
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Maximum number of workflows driven at once (1-256)
    #[serde(default = "default_max_concurrent_workflows")]
    pub max_concurrent_workflows: usize,

    /// Develop-stage fan-out per workflow
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: usize,

    /// Timeout for a single agent call, in seconds
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,

    /// Review rejections tolerated before the workflow fails
    #[serde(default = "default_max_review_iterations")]
    pub max_review_iterations: u32,

    /// Treat a failed review agent call as a rejected review
    #[serde(default)]
    pub review_failure_as_rejection: bool,

    /// What to do with interrupted workflows at startup
    #[serde(default)]
    pub recovery: RecoveryPolicy,

    /// Event store location and pool size
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Log level, format and optional rotating file
    #[serde(default)]
    pub logging: LoggingConfig,

    /// HTTP API settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Which Agent Capability adapter to use
    #[serde(default)]
    pub agent: AgentConfig,

    /// Where issues are fetched from
    #[serde(default)]
    pub tracker: TrackerConfig,
}

const fn default_max_concurrent_workflows() -> usize {
    4
}

const fn default_max_parallel_tasks() -> usize {
    4
}

const fn default_agent_timeout_secs() -> u64 {
    900
}

const fn default_max_review_iterations() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: default_max_concurrent_workflows(),
            max_parallel_tasks: default_max_parallel_tasks(),
            agent_timeout_secs: default_agent_timeout_secs(),
            max_review_iterations: default_max_review_iterations(),
            review_failure_as_rejection: false,
            recovery: RecoveryPolicy::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            server: ServerConfig::default(),
            agent: AgentConfig::default(),
            tracker: TrackerConfig::default(),
        }
    }
}

/// Crash-recovery policy for `InProgress`/`Blocked` workflows found at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Re-drive from the last recorded event while capacity remains.
    #[default]
    Resume,
    /// Mark every interrupted workflow failed.
    Fail,
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".maestro/maestro.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling JSON log files; stderr only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// File rotation: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind
    #[serde(default = "default_port")]
    pub port: u16,

    /// Allow cross-origin requests
    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Broadcast buffer per event bus; slow subscribers past this lag
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8420
}

const fn default_true() -> bool {
    true
}

const fn default_event_channel_capacity() -> usize {
    1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            enable_cors: true,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// Which Agent Capability adapter to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    #[default]
    Mock,
    Command,
    Http,
}

/// Agent Capability configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Adapter to construct
    #[serde(default)]
    pub kind: AgentKind,

    /// Executable for `kind: command`
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments for `kind: command`
    #[serde(default)]
    pub args: Vec<String>,

    /// Base URL for `kind: http`
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Environment variable holding the bearer token for `kind: http`
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Retries on transport errors for `kind: http`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

const fn default_max_retries() -> u32 {
    3
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            kind: AgentKind::default(),
            command: None,
            args: Vec::new(),
            endpoint: None,
            api_key_env: None,
            max_retries: default_max_retries(),
        }
    }
}

/// Which tracker adapter to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackerKind {
    #[default]
    None,
    Github,
}

/// Issue tracker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TrackerConfig {
    /// Adapter to construct
    #[serde(default)]
    pub kind: TrackerKind,

    /// Environment variable holding the API token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// API root, overridable for GitHub Enterprise
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            kind: TrackerKind::default(),
            token_env: default_token_env(),
            api_base: default_api_base(),
        }
    }
}
