//! Workflow events: the append-only record that is the sole source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AgentStageKind, Issue, ReviewResult, Stage, TaskGraph, TaskId};

/// One entry in a workflow's event log.
///
/// `sequence` starts at 1 and is gapless and strictly increasing per workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub workflow_id: Uuid,
    /// Position in the workflow's log, starting at 1.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub payload: EventPayload,
}

impl WorkflowEvent {
    /// Stamp a payload with its position and the current time.
    pub fn new(workflow_id: Uuid, sequence: u64, payload: EventPayload) -> Self {
        Self {
            workflow_id,
            sequence,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Snake-case name of the payload variant.
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}

/// Everything that can happen to a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    WorkflowCreated {
        issue: Issue,
        issue_ref: String,
        worktree_ref: Option<String>,
    },
    WorkflowStarted,
    /// A driver picked the workflow back up after a restart.
    WorkflowResumed {
        stage: Stage,
    },
    PlanCreated {
        plan: TaskGraph,
        summary: String,
    },
    PlanApproved,
    PlanRejected {
        feedback: String,
    },
    TaskDispatched {
        task_id: TaskId,
    },
    TaskCompleted {
        task_id: TaskId,
        files_changed: Vec<String>,
        summary: String,
    },
    /// One event per originating failure; `blocked` lists the dependents it took down.
    TaskFailed {
        task_id: TaskId,
        error: String,
        blocked: Vec<TaskId>,
    },
    DevelopmentFinished,
    ReviewCompleted {
        result: ReviewResult,
    },
    AgentFailed {
        stage: AgentStageKind,
        error: String,
    },
    RevisionStarted {
        iteration: u32,
    },
    WorkflowCompleted,
    WorkflowFailed {
        reason: String,
    },
    WorkflowCancelled {
        reason: Option<String>,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::WorkflowCreated { .. } => "workflow_created",
            Self::WorkflowStarted => "workflow_started",
            Self::WorkflowResumed { .. } => "workflow_resumed",
            Self::PlanCreated { .. } => "plan_created",
            Self::PlanApproved => "plan_approved",
            Self::PlanRejected { .. } => "plan_rejected",
            Self::TaskDispatched { .. } => "task_dispatched",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::DevelopmentFinished => "development_finished",
            Self::ReviewCompleted { .. } => "review_completed",
            Self::AgentFailed { .. } => "agent_failed",
            Self::RevisionStarted { .. } => "revision_started",
            Self::WorkflowCompleted => "workflow_completed",
            Self::WorkflowFailed { .. } => "workflow_failed",
            Self::WorkflowCancelled { .. } => "workflow_cancelled",
        }
    }

    /// Whether this event ends the workflow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::PlanRejected { .. }
                | Self::WorkflowCompleted
                | Self::WorkflowFailed { .. }
                | Self::WorkflowCancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_wire_format() {
        let payload = EventPayload::TaskDispatched {
            task_id: TaskId::from("a"),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "task_dispatched");
        assert_eq!(json["data"]["task_id"], "a");
        assert_eq!(payload.event_type(), "task_dispatched");

        let unit = serde_json::to_value(EventPayload::PlanApproved).unwrap();
        assert_eq!(unit["type"], "plan_approved");
    }

    #[test]
    fn test_terminal_payloads() {
        assert!(EventPayload::WorkflowCompleted.is_terminal());
        assert!(EventPayload::PlanRejected { feedback: "no".into() }.is_terminal());
        assert!(EventPayload::WorkflowCancelled { reason: None }.is_terminal());
        assert!(!EventPayload::RevisionStarted { iteration: 1 }.is_terminal());
    }
}
