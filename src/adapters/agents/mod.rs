//! Agent Capability adapters.
//!
//! `mock` is scripted and in-process, `command` runs a local executable per
//! call, and `http` posts to a remote agent service. [`build_agent`] picks
//! one from configuration.

pub mod command;
pub mod http;
pub mod mock;

use serde::Serialize;
use std::sync::Arc;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentConfig, AgentKind, WorkflowState};
use crate::domain::ports::{AgentCapability, AgentStage};

pub use command::CommandAgent;
pub use http::HttpAgent;
pub use mock::{MockAgent, MockCall, MockResponse};

/// Body sent to out-of-process agents: the stage being requested and the
/// workflow snapshot it runs against.
#[derive(Debug, Serialize)]
pub(crate) struct AgentRequest<'a> {
    /// Requested stage.
    pub stage: &'a AgentStage,
    /// Snapshot the stage runs against.
    pub state: &'a WorkflowState,
}

/// Construct the configured Agent Capability.
pub fn build_agent(config: &AgentConfig) -> DomainResult<Arc<dyn AgentCapability>> {
    let agent: Arc<dyn AgentCapability> = match config.kind {
        AgentKind::Mock => Arc::new(MockAgent::new()),
        AgentKind::Command => {
            let program = config.command.as_deref().ok_or_else(|| {
                DomainError::Validation("agent.command is required for the command agent".to_string())
            })?;
            Arc::new(CommandAgent::new(program, config.args.clone()))
        }
        AgentKind::Http => Arc::new(HttpAgent::from_config(config)?),
    };
    tracing::info!(agent = agent.name(), "agent capability configured");
    Ok(agent)
}
