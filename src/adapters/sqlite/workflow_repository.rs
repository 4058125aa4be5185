//! SQLite implementation of the WorkflowRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{parse_datetime, parse_optional_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{WorkflowRecord, WorkflowStatus};
use crate::domain::ports::WorkflowRepository;

/// SQLite-backed workflow records.
#[derive(Clone)]
pub struct SqliteWorkflowRepository {
    pool: SqlitePool,
}

impl SqliteWorkflowRepository {
    /// Repository over `pool`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WorkflowRow {
    id: String,
    issue_ref: String,
    status: String,
    worktree_ref: Option<String>,
    failure_reason: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    updated_at: String,
}

impl TryFrom<WorkflowRow> for WorkflowRecord {
    type Error = DomainError;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        let status = WorkflowStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::Serialization(format!("Invalid status: {}", row.status)))?;
        Ok(WorkflowRecord {
            id: parse_uuid(&row.id)?,
            issue_ref: row.issue_ref,
            status,
            worktree_ref: row.worktree_ref,
            failure_reason: row.failure_reason,
            created_at: parse_datetime(&row.created_at)?,
            started_at: parse_optional_datetime(row.started_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, issue_ref, status, worktree_ref, failure_reason, created_at, started_at, completed_at, updated_at FROM workflows";

#[async_trait]
impl WorkflowRepository for SqliteWorkflowRepository {
    async fn insert(&self, record: &WorkflowRecord) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO workflows (id, issue_ref, status, worktree_ref, failure_reason, created_at, started_at, completed_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.issue_ref)
        .bind(record.status.as_str())
        .bind(&record.worktree_ref)
        .bind(&record.failure_reason)
        .bind(record.created_at.to_rfc3339())
        .bind(record.started_at.map(|t| t.to_rfc3339()))
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<WorkflowRecord>> {
        let row: Option<WorkflowRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(WorkflowRecord::try_from).transpose()
    }

    async fn update(&self, record: &WorkflowRecord) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE workflows
             SET status = ?, failure_reason = ?, started_at = ?, completed_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(record.status.as_str())
        .bind(&record.failure_reason)
        .bind(record.started_at.map(|t| t.to_rfc3339()))
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .bind(record.updated_at.to_rfc3339())
        .bind(record.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::WorkflowNotFound(record.id));
        }
        Ok(())
    }

    async fn list(&self, status: Option<WorkflowStatus>, limit: Option<usize>) -> DomainResult<Vec<WorkflowRecord>> {
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let rows: Vec<WorkflowRow> = match status {
            Some(status) => {
                sqlx::query_as(&format!(
                    "{SELECT_COLUMNS} WHERE status = ? ORDER BY created_at DESC LIMIT ?"
                ))
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!("{SELECT_COLUMNS} ORDER BY created_at DESC LIMIT ?"))
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(WorkflowRecord::try_from).collect()
    }
}
