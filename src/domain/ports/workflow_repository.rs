//! Workflow record persistence port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{WorkflowRecord, WorkflowStatus};

/// Repository interface for [`WorkflowRecord`]s.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Store a new record.
    async fn insert(&self, record: &WorkflowRecord) -> DomainResult<()>;

    /// Load a record by id.
    async fn get(&self, id: Uuid) -> DomainResult<Option<WorkflowRecord>>;

    /// Overwrite status, timestamps and failure reason.
    async fn update(&self, record: &WorkflowRecord) -> DomainResult<()>;

    /// Most recently created first.
    async fn list(&self, status: Option<WorkflowStatus>, limit: Option<usize>) -> DomainResult<Vec<WorkflowRecord>>;
}
