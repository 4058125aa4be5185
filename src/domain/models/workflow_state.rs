//! Workflow state projection.
//!
//! `WorkflowState` is never persisted. It is rebuilt by folding the event
//! log through [`WorkflowState::apply`], which must stay a pure function of
//! the events it is given.
//!
//! ```text
//! Plan → Approve → Develop ⇄ Review → Done
//!          ↘ reject          ↘ cap exceeded / agent failure → Failed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    EventPayload, Issue, ReviewResult, Stage, TaskGraph, TaskId, WorkflowEvent, WorkflowStatus,
};

/// Something an agent (or the orchestrator on its behalf) said during the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Stage the message was produced in.
    pub stage: Stage,
    /// Develop task the message belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub content: String,
    pub at: DateTime<Utc>,
}

/// In-memory projection of one workflow's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Workflow this projection belongs to.
    pub workflow_id: Uuid,
    /// Issue captured by `WorkflowCreated`.
    pub issue: Option<Issue>,
    /// Task graph from the last `PlanCreated`, with task statuses folded in.
    pub plan: Option<TaskGraph>,
    pub current_stage: Stage,
    /// Decision at the approval gate; `None` until one is recorded.
    pub human_approved: Option<bool>,
    /// Every recorded review verdict, oldest first.
    pub review_results: Vec<ReviewResult>,
    /// A verdict has been recorded for the current Review entry.
    pub review_recorded: bool,
    pub messages: Vec<AgentMessage>,
    /// Number of Develop re-entries triggered by review.
    pub revision_count: u32,
    /// Lifecycle status, mirrored into the workflow record.
    pub status: WorkflowStatus,
    pub failure_reason: Option<String>,
    /// Rejection feedback from the approval gate.
    pub feedback: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Sequence of the last event folded in; 0 for an empty log.
    pub last_sequence: u64,
}

impl WorkflowState {
    /// Projection of an empty log.
    pub fn new(workflow_id: Uuid) -> Self {
        Self {
            workflow_id,
            issue: None,
            plan: None,
            current_stage: Stage::Plan,
            human_approved: None,
            review_results: Vec::new(),
            review_recorded: false,
            messages: Vec::new(),
            revision_count: 0,
            status: WorkflowStatus::Pending,
            failure_reason: None,
            feedback: None,
            started_at: None,
            completed_at: None,
            last_sequence: 0,
        }
    }

    /// Fold an ordered event list into a fresh state.
    pub fn replay(workflow_id: Uuid, events: &[WorkflowEvent]) -> Self {
        let mut state = Self::new(workflow_id);
        for event in events {
            state.apply(event);
        }
        state
    }

    /// Apply one event. Events at or below `last_sequence` are ignored.
    pub fn apply(&mut self, event: &WorkflowEvent) {
        if event.sequence <= self.last_sequence {
            return;
        }
        self.last_sequence = event.sequence;
        let at = event.timestamp;

        match &event.payload {
            EventPayload::WorkflowCreated { issue, .. } => {
                self.issue = Some(issue.clone());
                self.status = WorkflowStatus::Pending;
            }
            EventPayload::WorkflowStarted => {
                self.current_stage = Stage::Plan;
                self.status = WorkflowStatus::InProgress;
                self.started_at = Some(at);
            }
            EventPayload::WorkflowResumed { .. } => {
                if let Some(plan) = self.plan.as_mut() {
                    plan.requeue_in_progress();
                }
            }
            EventPayload::PlanCreated { plan, summary } => {
                self.plan = Some(plan.clone());
                self.current_stage = Stage::Approve;
                self.status = WorkflowStatus::Blocked;
                self.push_message(Stage::Plan, None, summary.clone(), at);
            }
            EventPayload::PlanApproved => {
                self.human_approved = Some(true);
                self.current_stage = Stage::Develop;
                self.status = WorkflowStatus::InProgress;
            }
            EventPayload::PlanRejected { feedback } => {
                self.human_approved = Some(false);
                self.feedback = Some(feedback.clone());
                self.fail(format!("plan rejected: {feedback}"), at);
            }
            EventPayload::TaskDispatched { task_id } => {
                if let Some(task) = self.task_mut(task_id) {
                    task.status = super::TaskStatus::InProgress;
                }
            }
            EventPayload::TaskCompleted {
                task_id,
                files_changed,
                summary,
            } => {
                if let Some(plan) = self.plan.as_mut() {
                    // Unknown ids are skipped; a recorded event is never rejected.
                    let _ = plan.complete_task(task_id, files_changed.clone());
                }
                self.push_message(Stage::Develop, Some(task_id.clone()), summary.clone(), at);
            }
            EventPayload::TaskFailed {
                task_id,
                error,
                blocked,
            } => {
                if let Some(plan) = self.plan.as_mut() {
                    plan.mark_failed(std::slice::from_ref(task_id));
                    plan.mark_failed(blocked);
                }
                self.push_message(Stage::Develop, Some(task_id.clone()), error.clone(), at);
            }
            EventPayload::DevelopmentFinished => {
                self.current_stage = Stage::Review;
                self.review_recorded = false;
            }
            EventPayload::ReviewCompleted { result } => {
                self.review_results.push(result.clone());
                self.review_recorded = true;
                let content = if result.approved {
                    "review approved".to_string()
                } else {
                    format!("changes requested: {}", result.comments.join("; "))
                };
                self.push_message(Stage::Review, None, content, at);
            }
            EventPayload::AgentFailed { stage, error } => {
                self.push_message(Stage::from(*stage), None, format!("agent failed: {error}"), at);
            }
            EventPayload::RevisionStarted { iteration } => {
                self.revision_count = *iteration;
                self.current_stage = Stage::Develop;
                if let Some(plan) = self.plan.as_mut() {
                    plan.reopen_completed();
                }
            }
            EventPayload::WorkflowCompleted => {
                self.current_stage = Stage::Done;
                self.status = WorkflowStatus::Completed;
                self.completed_at = Some(at);
            }
            EventPayload::WorkflowFailed { reason } => {
                self.fail(reason.clone(), at);
            }
            EventPayload::WorkflowCancelled { reason } => {
                self.status = WorkflowStatus::Cancelled;
                self.failure_reason.clone_from(reason);
                self.completed_at = Some(at);
            }
        }
    }

    fn fail(&mut self, reason: String, at: DateTime<Utc>) {
        self.current_stage = Stage::Failed;
        self.status = WorkflowStatus::Failed;
        self.failure_reason = Some(reason);
        self.completed_at = Some(at);
    }

    fn task_mut(&mut self, id: &TaskId) -> Option<&mut super::Task> {
        self.plan
            .as_mut()
            .and_then(|plan| plan.tasks_mut().iter_mut().find(|t| &t.id == id))
    }

    fn push_message(&mut self, stage: Stage, task_id: Option<TaskId>, content: String, at: DateTime<Utc>) {
        self.messages.push(AgentMessage {
            stage,
            task_id,
            content,
            at,
        });
    }

    /// Completed, failed or cancelled.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Suspended at the approval gate with no decision recorded.
    pub fn awaiting_decision(&self) -> bool {
        !self.is_terminal() && self.current_stage == Stage::Approve && self.human_approved.is_none()
    }
}
