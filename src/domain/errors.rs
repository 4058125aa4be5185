//! Domain errors for the Maestro orchestrator.

use thiserror::Error;
use uuid::Uuid;

use super::models::{AgentStageKind, TaskId};

/// Format a cycle path as a human-readable string: `A -> B -> C -> A`.
fn format_cycle_path(path: &[TaskId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Failures reported by (or while calling) an Agent Capability.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("{stage} agent timed out after {secs}s")]
    Timeout { stage: AgentStageKind, secs: u64 },

    #[error("agent failed: {0}")]
    Failed(String),

    #[error("agent returned {got} output where {expected} was expected")]
    UnexpectedOutput { expected: &'static str, got: &'static str },

    #[error("agent unavailable: {0}")]
    Unavailable(String),
}

/// Domain-level errors that can occur in the Maestro system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict on workflow {workflow_id}: {reason}")]
    Conflict { workflow_id: Uuid, reason: String },

    #[error("Concurrency ceiling of {limit} running workflows reached")]
    CapacityExceeded { limit: usize },

    #[error("Sequence {sequence} already exists for workflow {workflow_id}")]
    SequenceConflict { workflow_id: Uuid, sequence: u64 },

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Task dependency cycle detected: {}", format_cycle_path(.0))]
    DependencyCycle(Vec<TaskId>),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Tracker error: {0}")]
    Tracker(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DomainError {
    /// Shorthand for a [`DomainError::Conflict`].
    pub fn conflict(workflow_id: Uuid, reason: impl Into<String>) -> Self {
        Self::Conflict {
            workflow_id,
            reason: reason.into(),
        }
    }

    /// Whether the caller may reasonably retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded { .. } | Self::Repository(_) | Self::SequenceConflict { .. }
        )
    }
}

/// Result alias for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::Repository(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}
