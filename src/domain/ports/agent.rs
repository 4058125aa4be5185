//! Agent Capability port.
//!
//! A single callable used for planning, per-task implementation and review.
//! The stage machine never branches on which adapter sits behind it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::AgentError;
use crate::domain::models::{AgentStageKind, PlannedTask, ReviewResult, Task, WorkflowState};

/// What the agent is being asked to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum AgentStage {
    Plan,
    Develop { task: Task },
    Review { files_changed: Vec<String> },
}

impl AgentStage {
    /// Which agent stage this request belongs to.
    pub fn kind(&self) -> AgentStageKind {
        match self {
            Self::Plan => AgentStageKind::Plan,
            Self::Develop { .. } => AgentStageKind::Develop,
            Self::Review { .. } => AgentStageKind::Review,
        }
    }
}

/// Result of one Develop-stage task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskOutcome {
    /// Paths the task touched.
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

/// Structured result returned by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentOutput {
    Plan {
        tasks: Vec<PlannedTask>,
        #[serde(default)]
        summary: String,
    },
    Task(TaskOutcome),
    Review(ReviewResult),
}

impl AgentOutput {
    /// Which agent stage produced this output.
    pub fn kind(&self) -> AgentStageKind {
        match self {
            Self::Plan { .. } => AgentStageKind::Plan,
            Self::Task(_) => AgentStageKind::Develop,
            Self::Review(_) => AgentStageKind::Review,
        }
    }

    /// Unwrap a plan, or report the mismatch.
    pub fn into_plan(self) -> Result<(Vec<PlannedTask>, String), AgentError> {
        match self {
            Self::Plan { tasks, summary } => Ok((tasks, summary)),
            other => Err(other.unexpected(AgentStageKind::Plan)),
        }
    }

    /// Unwrap a task outcome, or report the mismatch.
    pub fn into_task(self) -> Result<TaskOutcome, AgentError> {
        match self {
            Self::Task(outcome) => Ok(outcome),
            other => Err(other.unexpected(AgentStageKind::Develop)),
        }
    }

    /// Unwrap a review verdict, or report the mismatch.
    pub fn into_review(self) -> Result<ReviewResult, AgentError> {
        match self {
            Self::Review(result) => Ok(result),
            other => Err(other.unexpected(AgentStageKind::Review)),
        }
    }

    fn unexpected(&self, expected: AgentStageKind) -> AgentError {
        AgentError::UnexpectedOutput {
            expected: expected.as_str(),
            got: self.kind().as_str(),
        }
    }
}

/// Trait for Agent Capability implementations.
#[async_trait]
pub trait AgentCapability: Send + Sync {
    /// Adapter name, for logs.
    fn name(&self) -> &'static str;

    /// Whether several Develop tasks may be in flight at once.
    ///
    /// When false the scheduler drains ready tasks one at a time.
    fn supports_parallel(&self) -> bool {
        true
    }

    /// Run the agent for `stage` against a snapshot of the workflow.
    async fn generate(&self, stage: &AgentStage, state: &WorkflowState) -> Result<AgentOutput, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_output_kind_is_rejected() {
        let output = AgentOutput::Review(ReviewResult::approved());
        let err = output.into_task().unwrap_err();
        assert_eq!(
            err,
            AgentError::UnexpectedOutput {
                expected: "develop",
                got: "review"
            }
        );
    }

    #[test]
    fn test_output_wire_format() {
        let output: AgentOutput = serde_json::from_str(
            r#"{"kind":"plan","tasks":[{"id":"a","description":"do a"}]}"#,
        )
        .unwrap();
        let (tasks, summary) = output.into_plan().unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].dependencies.is_empty());
        assert!(summary.is_empty());
    }
}
