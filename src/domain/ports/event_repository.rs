//! Event log persistence port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::WorkflowEvent;

/// Append-only, per-workflow sequenced storage of [`WorkflowEvent`]s.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Persist one event.
    ///
    /// Fails with `DomainError::SequenceConflict` if the workflow already has
    /// an event at `event.sequence`.
    async fn append(&self, event: &WorkflowEvent) -> DomainResult<()>;

    /// Events with `sequence > after`, ascending.
    async fn events_since(&self, workflow_id: Uuid, after: u64) -> DomainResult<Vec<WorkflowEvent>>;

    /// Highest stored sequence, or 0 for an empty log.
    async fn latest_sequence(&self, workflow_id: Uuid) -> DomainResult<u64>;
}
