//! SQLite implementation of the EventRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{parse_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{EventPayload, WorkflowEvent};
use crate::domain::ports::EventRepository;

/// SQLite-backed event log.
#[derive(Clone)]
pub struct SqliteEventRepository {
    pool: SqlitePool,
}

impl SqliteEventRepository {
    /// Repository over `pool`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: EventRow) -> DomainResult<WorkflowEvent> {
        let payload: EventPayload = serde_json::from_str(&row.payload)?;
        if payload.event_type() != row.event_type {
            return Err(DomainError::Serialization(format!(
                "event {} of workflow {} is stored as '{}' but decodes as '{}'",
                row.sequence,
                row.workflow_id,
                row.event_type,
                payload.event_type()
            )));
        }
        Ok(WorkflowEvent {
            workflow_id: parse_uuid(&row.workflow_id)?,
            sequence: u64::try_from(row.sequence)
                .map_err(|e| DomainError::Serialization(format!("invalid sequence: {e}")))?,
            timestamp: parse_datetime(&row.timestamp)?,
            payload,
        })
    }
}

#[async_trait]
impl EventRepository for SqliteEventRepository {
    async fn append(&self, event: &WorkflowEvent) -> DomainResult<()> {
        let payload_json = serde_json::to_string(&event.payload)?;
        let sequence = i64::try_from(event.sequence)
            .map_err(|e| DomainError::Validation(format!("sequence out of range: {e}")))?;

        let result = sqlx::query(
            "INSERT INTO workflow_events (workflow_id, sequence, timestamp, event_type, payload)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(event.workflow_id.to_string())
        .bind(sequence)
        .bind(event.timestamp.to_rfc3339())
        .bind(event.event_type())
        .bind(payload_json)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(DomainError::SequenceConflict {
                workflow_id: event.workflow_id,
                sequence: event.sequence,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn events_since(&self, workflow_id: Uuid, after: u64) -> DomainResult<Vec<WorkflowEvent>> {
        let after = i64::try_from(after).unwrap_or(i64::MAX);
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT workflow_id, sequence, timestamp, event_type, payload
             FROM workflow_events
             WHERE workflow_id = ? AND sequence > ?
             ORDER BY sequence ASC",
        )
        .bind(workflow_id.to_string())
        .bind(after)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn latest_sequence(&self, workflow_id: Uuid) -> DomainResult<u64> {
        let (latest,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(sequence), 0) FROM workflow_events WHERE workflow_id = ?")
                .bind(workflow_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        u64::try_from(latest).map_err(|e| DomainError::Serialization(format!("invalid sequence: {e}")))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    workflow_id: String,
    sequence: i64,
    timestamp: String,
    event_type: String,
    payload: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteWorkflowRepository};
    use crate::domain::models::{TaskId, WorkflowRecord};
    use crate::domain::ports::WorkflowRepository;

    async fn setup() -> (SqliteEventRepository, Uuid) {
        let pool = create_migrated_test_pool().await.unwrap();
        let record = WorkflowRecord::new("octo/repo#7", None);
        SqliteWorkflowRepository::new(pool.clone()).insert(&record).await.unwrap();
        (SqliteEventRepository::new(pool), record.id)
    }

    #[tokio::test]
    async fn test_append_and_read_back_in_order() {
        let (repo, id) = setup().await;
        repo.append(&WorkflowEvent::new(id, 1, EventPayload::WorkflowStarted)).await.unwrap();
        repo.append(&WorkflowEvent::new(
            id,
            2,
            EventPayload::TaskDispatched {
                task_id: TaskId::from("a"),
            },
        ))
        .await
        .unwrap();
        repo.append(&WorkflowEvent::new(id, 3, EventPayload::WorkflowCompleted)).await.unwrap();

        let all = repo.events_since(id, 0).await.unwrap();
        assert_eq!(all.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(all[1].event_type(), "task_dispatched");

        let tail = repo.events_since(id, 2).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].payload, EventPayload::WorkflowCompleted);
        assert_eq!(repo.latest_sequence(id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_sequence_is_a_conflict() {
        let (repo, id) = setup().await;
        repo.append(&WorkflowEvent::new(id, 1, EventPayload::WorkflowStarted)).await.unwrap();

        let err = repo
            .append(&WorkflowEvent::new(id, 1, EventPayload::WorkflowCompleted))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::SequenceConflict { sequence: 1, .. }));
        assert_eq!(repo.events_since(id, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_log() {
        let (repo, id) = setup().await;
        assert_eq!(repo.latest_sequence(id).await.unwrap(), 0);
        assert!(repo.events_since(id, 0).await.unwrap().is_empty());
    }
}
