//! Durable workflow record.
//!
//! The record is a cache of the event log: its status and timestamps are
//! always re-derivable from the projected [`WorkflowState`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::WorkflowState;

/// Lifecycle status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Submitted, never started.
    #[default]
    Pending,
    /// A driver is executing a stage.
    InProgress,
    /// Suspended at the approval gate.
    Blocked,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Wire name, as stored in the `workflows` table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a wire name; `running` is accepted for `in_progress`.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" | "running" => Some(Self::InProgress),
            "blocked" => Some(Self::Blocked),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// No further events are accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Statuses that require a live driver.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::InProgress | Self::Blocked)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted summary of one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: Uuid,
    /// Tracker reference the workflow was submitted with.
    pub issue_ref: String,
    pub status: WorkflowStatus,
    /// Opaque worktree handle passed through to the agent.
    pub worktree_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRecord {
    /// A fresh `Pending` record with a new id.
    pub fn new(issue_ref: impl Into<String>, worktree_ref: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            issue_ref: issue_ref.into(),
            status: WorkflowStatus::Pending,
            worktree_ref,
            failure_reason: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Bring the cached fields in line with the projection.
    ///
    /// Returns `true` if anything changed.
    pub fn sync_from(&mut self, state: &WorkflowState) -> bool {
        let changed = self.status != state.status
            || self.failure_reason != state.failure_reason
            || self.started_at != state.started_at
            || self.completed_at != state.completed_at;
        if changed {
            self.status = state.status;
            self.failure_reason.clone_from(&state.failure_reason);
            self.started_at = state.started_at;
            self.completed_at = state.completed_at;
            self.updated_at = Utc::now();
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        assert_eq!(WorkflowStatus::from_str("in_progress"), Some(WorkflowStatus::InProgress));
        assert_eq!(WorkflowStatus::from_str("Canceled"), Some(WorkflowStatus::Cancelled));
        assert_eq!(WorkflowStatus::from_str("bogus"), None);
        for status in [
            WorkflowStatus::Pending,
            WorkflowStatus::InProgress,
            WorkflowStatus::Blocked,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Cancelled,
        ] {
            assert_eq!(WorkflowStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_sync_from_projection() {
        let mut record = WorkflowRecord::new("octo/repo#1", None);
        let mut state = WorkflowState::new(record.id);
        assert!(!record.sync_from(&state));

        state.status = WorkflowStatus::Failed;
        state.failure_reason = Some("interrupted".to_string());
        assert!(record.sync_from(&state));
        assert_eq!(record.status, WorkflowStatus::Failed);
        assert_eq!(record.failure_reason.as_deref(), Some("interrupted"));
    }
}
