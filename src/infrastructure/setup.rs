//! Runtime assembly.
//!
//! Wires the configured database, repositories, event log, agent and
//! tracker into a [`Coordinator`].

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::adapters::agents::build_agent;
use crate::adapters::sqlite::{
    database_url, initialize_database, PoolConfig, SqliteEventRepository, SqliteWorkflowRepository,
};
use crate::adapters::trackers::build_tracker;
use crate::domain::models::Config;
use crate::domain::ports::AgentCapability;
use crate::services::{Coordinator, CoordinatorConfig, EventBus, EventBusConfig, EventLog};

/// Everything a running server holds on to.
pub struct Runtime {
    /// Shared database pool, closed on shutdown.
    pub pool: SqlitePool,
    /// The coordinator serving requests.
    pub coordinator: Coordinator,
}

/// Build the runtime with the agent named in `config.agent`.
pub async fn build_runtime(config: &Config) -> Result<Runtime> {
    let agent = build_agent(&config.agent).context("Failed to configure agent")?;
    build_runtime_with_agent(config, agent).await
}

/// Build the runtime around an explicit agent.
pub async fn build_runtime_with_agent(config: &Config, agent: Arc<dyn AgentCapability>) -> Result<Runtime> {
    let url = database_url(&config.database.path);
    let pool = initialize_database(&url, Some(PoolConfig::from(&config.database)))
        .await
        .with_context(|| format!("Failed to open database at {}", config.database.path))?;

    let bus = Arc::new(EventBus::new(EventBusConfig {
        channel_capacity: config.server.event_channel_capacity,
    }));
    let log = Arc::new(EventLog::new(
        Arc::new(SqliteEventRepository::new(pool.clone())),
        Arc::new(SqliteWorkflowRepository::new(pool.clone())),
        bus,
    ));
    let tracker = build_tracker(&config.tracker);
    let coordinator = Coordinator::new(log, agent, tracker, CoordinatorConfig::from(config));

    Ok(Runtime { pool, coordinator })
}
