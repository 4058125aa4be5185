//! Sequenced, per-workflow event log.
//!
//! Every write goes through [`EventLog::append`] or [`EventLog::append_if`],
//! which hold a per-workflow lock while they:
//!
//! 1. reject the append if the projection is already terminal,
//! 2. run the caller's precondition against the current projection,
//! 3. assign `last_sequence + 1` and persist the event,
//! 4. fold the event into the cached projection,
//! 5. sync the workflow record and publish on the bus.
//!
//! Different workflows never contend on the same lock. Projections of
//! terminal workflows are dropped from the cache; reads rebuild them from
//! storage.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    EventPayload, Issue, WorkflowEvent, WorkflowRecord, WorkflowState, WorkflowStatus,
};
use crate::domain::ports::{EventRepository, WorkflowRepository};
use crate::services::event_bus::EventBus;

/// Cached projection for one workflow; `None` until first loaded.
type Stream = Arc<Mutex<Option<WorkflowState>>>;

/// Serialized writer and cached reader of every workflow's event log.
pub struct EventLog {
    events: Arc<dyn EventRepository>,
    workflows: Arc<dyn WorkflowRepository>,
    bus: Arc<EventBus>,
    streams: Mutex<HashMap<Uuid, Stream>>,
    /// Workflows whose record missed a sync after a committed event.
    unsynced: Mutex<HashSet<Uuid>>,
}

impl EventLog {
    /// Build a log over the given repositories, publishing on `bus`.
    pub fn new(
        events: Arc<dyn EventRepository>,
        workflows: Arc<dyn WorkflowRepository>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            events,
            workflows,
            bus,
            streams: Mutex::new(HashMap::new()),
            unsynced: Mutex::new(HashSet::new()),
        }
    }

    /// The bus every committed event is published on.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Persist a new `Pending` record and its `WorkflowCreated` event.
    pub async fn create(&self, record: &WorkflowRecord, issue: Issue) -> DomainResult<WorkflowEvent> {
        self.workflows.insert(record).await?;
        let stream = self.stream(record.id).await;
        let mut guard = stream.lock().await;
        *guard = Some(WorkflowState::new(record.id));

        let payload = EventPayload::WorkflowCreated {
            issue,
            issue_ref: record.issue_ref.clone(),
            worktree_ref: record.worktree_ref.clone(),
        };
        let (event, _) = self.commit(record.id, &mut guard, payload).await?;
        Ok(event)
    }

    /// Append an event unconditionally (apart from the terminal check).
    pub async fn append(&self, workflow_id: Uuid, payload: EventPayload) -> DomainResult<WorkflowState> {
        self.append_if(workflow_id, |_| Ok(()), payload).await
    }

    /// Append an event if `precondition` accepts the current projection.
    ///
    /// The check and the append happen under the same per-workflow lock, so
    /// two racing callers cannot both pass. Returns the projection after the
    /// event is applied.
    pub async fn append_if<F>(
        &self,
        workflow_id: Uuid,
        precondition: F,
        payload: EventPayload,
    ) -> DomainResult<WorkflowState>
    where
        F: FnOnce(&WorkflowState) -> DomainResult<()> + Send,
    {
        let stream = self.stream(workflow_id).await;
        let mut guard = stream.lock().await;
        let state = match self.loaded(workflow_id, &mut guard).await {
            Ok(state) => state,
            Err(err) => {
                self.evict(workflow_id).await;
                return Err(err);
            }
        };

        if state.is_terminal() {
            let status = state.status;
            self.evict(workflow_id).await;
            return Err(DomainError::conflict(workflow_id, format!("workflow is already {status}")));
        }
        precondition(state)?;

        let (_, state) = self.commit(workflow_id, &mut guard, payload).await?;
        Ok(state)
    }

    async fn commit(
        &self,
        workflow_id: Uuid,
        guard: &mut Option<WorkflowState>,
        payload: EventPayload,
    ) -> DomainResult<(WorkflowEvent, WorkflowState)> {
        let Some(state) = guard.as_mut() else {
            return Err(DomainError::WorkflowNotFound(workflow_id));
        };
        let event = WorkflowEvent::new(workflow_id, state.last_sequence + 1, payload);

        if let Err(err) = self.events.append(&event).await {
            if matches!(err, DomainError::SequenceConflict { .. }) {
                // Someone else wrote to this log; reload on next access.
                *guard = None;
            }
            tracing::warn!(%workflow_id, sequence = event.sequence, error = %err, "event append failed");
            return Err(err);
        }

        let before = state.status;
        state.apply(&event);
        let snapshot = state.clone();
        tracing::debug!(
            %workflow_id,
            sequence = event.sequence,
            event_type = event.event_type(),
            "event appended"
        );

        match self.sync_record(&snapshot).await {
            Ok(()) => {
                self.unsynced.lock().await.remove(&workflow_id);
                if before != snapshot.status {
                    tracing::info!(%workflow_id, from = %before, to = %snapshot.status, "workflow status changed");
                }
            }
            Err(err) => {
                // The log is authoritative; the next record read retries.
                tracing::error!(%workflow_id, error = %err, "failed to sync workflow record");
                self.unsynced.lock().await.insert(workflow_id);
            }
        }

        self.bus.publish(event.clone());
        if snapshot.is_terminal() {
            // Callers already queued on this stream still see the terminal state.
            self.evict(workflow_id).await;
        }
        Ok((event, snapshot))
    }

    async fn sync_record(&self, state: &WorkflowState) -> DomainResult<()> {
        let mut record = self
            .workflows
            .get(state.workflow_id)
            .await?
            .ok_or(DomainError::WorkflowNotFound(state.workflow_id))?;
        if record.sync_from(state) {
            self.workflows.update(&record).await?;
        }
        Ok(())
    }

    async fn stream(&self, workflow_id: Uuid) -> Stream {
        self.streams
            .lock()
            .await
            .entry(workflow_id)
            .or_default()
            .clone()
    }

    async fn evict(&self, workflow_id: Uuid) {
        self.streams.lock().await.remove(&workflow_id);
    }

    /// Retry record syncs that failed when their event was committed.
    async fn heal_records(&self) {
        let pending: Vec<Uuid> = self.unsynced.lock().await.iter().copied().collect();
        for workflow_id in pending {
            let stream = self.stream(workflow_id).await;
            let mut guard = stream.lock().await;
            let result = match self.loaded(workflow_id, &mut guard).await {
                Ok(state) => self.sync_record(state).await.map(|()| state.is_terminal()),
                Err(err) => Err(err),
            };
            drop(guard);
            match result {
                Ok(terminal) => {
                    self.unsynced.lock().await.remove(&workflow_id);
                    if terminal {
                        self.evict(workflow_id).await;
                    }
                    tracing::info!(%workflow_id, "workflow record re-synced");
                }
                Err(err) => {
                    tracing::warn!(%workflow_id, error = %err, "workflow record still out of sync");
                }
            }
        }
    }

    async fn loaded<'a>(
        &self,
        workflow_id: Uuid,
        guard: &'a mut Option<WorkflowState>,
    ) -> DomainResult<&'a WorkflowState> {
        if guard.is_none() {
            *guard = Some(self.project(workflow_id).await?);
        }
        guard.as_ref().ok_or(DomainError::WorkflowNotFound(workflow_id))
    }

    /// Rebuild the projection from storage, bypassing the cache.
    pub async fn project(&self, workflow_id: Uuid) -> DomainResult<WorkflowState> {
        if self.workflows.get(workflow_id).await?.is_none() {
            return Err(DomainError::WorkflowNotFound(workflow_id));
        }
        let events = self.events.events_since(workflow_id, 0).await?;
        Ok(WorkflowState::replay(workflow_id, &events))
    }

    /// Current projection, served from cache when possible.
    pub async fn state(&self, workflow_id: Uuid) -> DomainResult<WorkflowState> {
        let state = {
            let stream = self.stream(workflow_id).await;
            let mut guard = stream.lock().await;
            let loaded = self.loaded(workflow_id, &mut guard).await.cloned();
            loaded
        };
        if !matches!(&state, Ok(s) if !s.is_terminal()) {
            self.evict(workflow_id).await;
        }
        state
    }

    /// Re-derive the record's cached fields from the log.
    pub async fn resync(&self, workflow_id: Uuid) -> DomainResult<WorkflowState> {
        let state = self.project(workflow_id).await?;
        self.sync_record(&state).await?;
        self.unsynced.lock().await.remove(&workflow_id);
        if state.is_terminal() {
            self.evict(workflow_id).await;
        } else {
            *self.stream(workflow_id).await.lock().await = Some(state.clone());
        }
        Ok(state)
    }

    /// Events with `sequence > after`, in order.
    pub async fn events_since(&self, workflow_id: Uuid, after: u64) -> DomainResult<Vec<WorkflowEvent>> {
        if self.workflows.get(workflow_id).await?.is_none() {
            return Err(DomainError::WorkflowNotFound(workflow_id));
        }
        self.events.events_since(workflow_id, after).await
    }

    /// The stored record, after retrying any pending syncs.
    pub async fn record(&self, workflow_id: Uuid) -> DomainResult<WorkflowRecord> {
        self.heal_records().await;
        self.workflows
            .get(workflow_id)
            .await?
            .ok_or(DomainError::WorkflowNotFound(workflow_id))
    }

    /// Stored records, newest first, after retrying any pending syncs.
    pub async fn list(&self, status: Option<WorkflowStatus>, limit: Option<usize>) -> DomainResult<Vec<WorkflowRecord>> {
        self.heal_records().await;
        self.workflows.list(status, limit).await
    }
}
