//! Execution coordinator.
//!
//! Runs a [`StageMachine`] per active workflow on its own tokio task,
//! bounded by a global ceiling on `InProgress` workflows. The ceiling is a
//! semaphore whose permits live in each driver's [`ExecutionSlot`]. `start`
//! and `approve` claim a permit with `try_acquire_owned`, so the budget check
//! and the increment are one atomic step. A driver parked at the approval
//! gate gives its permit back.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Config, EventPayload, RecoveryPolicy, WorkflowEvent, WorkflowRecord, WorkflowState,
    WorkflowStatus,
};
use crate::domain::ports::{AgentCapability, Tracker};
use crate::services::event_log::EventLog;
use crate::services::stage_machine::{ExecutionSlot, StageMachine, StageSettings};
use crate::services::task_scheduler::SchedulerConfig;

/// Reason recorded for workflows that could not be resumed after a restart.
pub const INTERRUPTED: &str = "interrupted";

/// Configuration for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Ceiling on workflows driven while `InProgress`.
    pub max_concurrent_workflows: usize,
    /// Settings handed to every stage machine.
    pub stage: StageSettings,
    /// What `recover` does with interrupted workflows.
    pub recovery: RecoveryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for CoordinatorConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_concurrent_workflows: config.max_concurrent_workflows,
            stage: StageSettings {
                scheduler: SchedulerConfig::new(config.max_parallel_tasks, config.agent_timeout_secs),
                max_review_iterations: config.max_review_iterations,
                review_failure_as_rejection: config.review_failure_as_rejection,
            },
            recovery: config.recovery,
        }
    }
}

/// A record together with its projected state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowView {
    pub record: WorkflowRecord,
    pub state: WorkflowState,
}

/// What `recover` did with each interrupted workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Workflows handed to a new driver.
    pub resumed: Vec<Uuid>,
    /// Workflows failed as interrupted.
    pub failed: Vec<Uuid>,
}

struct Driver {
    slot: ExecutionSlot,
    cancel: CancellationToken,
    /// `None` while `start` is still recording the start event.
    handle: Option<JoinHandle<()>>,
}

impl Driver {
    fn reserved() -> Self {
        Self {
            slot: ExecutionSlot::default(),
            cancel: CancellationToken::new(),
            handle: None,
        }
    }
}

/// Handle to the coordinator. Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    log: Arc<EventLog>,
    agent: Arc<dyn AgentCapability>,
    tracker: Arc<dyn Tracker>,
    config: CoordinatorConfig,
    permits: Arc<Semaphore>,
    drivers: Arc<Mutex<HashMap<Uuid, Driver>>>,
}

impl Coordinator {
    /// Build a coordinator with an empty driver set.
    pub fn new(
        log: Arc<EventLog>,
        agent: Arc<dyn AgentCapability>,
        tracker: Arc<dyn Tracker>,
        config: CoordinatorConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_workflows));
        Self {
            log,
            agent,
            tracker,
            config,
            permits,
            drivers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The event log every driver writes through.
    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    /// The configured ceiling.
    pub fn max_concurrent(&self) -> usize {
        self.config.max_concurrent_workflows
    }

    /// Workflows currently holding a slot, i.e. driven and `InProgress`.
    pub fn active_count(&self) -> usize {
        self.config.max_concurrent_workflows - self.permits.available_permits()
    }

    /// Slots a `start` or `approve` could still claim.
    pub fn available_capacity(&self) -> usize {
        self.permits.available_permits()
    }

    /// Fetch the issue and create a `Pending` workflow.
    pub async fn submit(&self, issue_ref: &str, worktree_ref: Option<String>) -> DomainResult<Uuid> {
        let issue_ref = issue_ref.trim();
        if issue_ref.is_empty() {
            return Err(DomainError::Validation("issue_ref cannot be empty".to_string()));
        }
        let issue = self.tracker.fetch_issue(issue_ref).await?;
        let record = WorkflowRecord::new(issue_ref, worktree_ref);
        self.log.create(&record, issue).await?;
        tracing::info!(workflow_id = %record.id, issue_ref, tracker = self.tracker.name(), "workflow submitted");
        Ok(record.id)
    }

    /// Start driving a workflow.
    ///
    /// A `Pending` workflow gets `WorkflowStarted`; an active one with no
    /// driver (left over from a restart) gets `WorkflowResumed`. A slot is
    /// claimed unless the workflow is parked at the approval gate.
    pub async fn start(&self, workflow_id: Uuid) -> DomainResult<()> {
        let (slot, cancel) = {
            let mut drivers = self.drivers.lock().await;
            if drivers.contains_key(&workflow_id) {
                return Err(DomainError::conflict(workflow_id, "workflow is already running"));
            }
            let driver = Driver::reserved();
            let reservation = (driver.slot.clone(), driver.cancel.clone());
            drivers.insert(workflow_id, driver);
            reservation
        };

        if let Err(err) = self.record_start(workflow_id, &slot).await {
            self.drivers.lock().await.remove(&workflow_id);
            return Err(err);
        }

        let handle = self.spawn_driver(workflow_id, slot, cancel);
        if let Some(driver) = self.drivers.lock().await.get_mut(&workflow_id) {
            driver.handle = Some(handle);
        }
        tracing::info!(workflow_id = %workflow_id, active = self.active_count(), "workflow driver started");
        Ok(())
    }

    async fn record_start(&self, workflow_id: Uuid, slot: &ExecutionSlot) -> DomainResult<()> {
        let mut permit = slot.lock().await;
        let state = self.log.state(workflow_id).await?;
        let payload = match state.status {
            WorkflowStatus::Pending => EventPayload::WorkflowStarted,
            status if status.is_active() => EventPayload::WorkflowResumed {
                stage: state.current_stage,
            },
            status => {
                return Err(DomainError::conflict(workflow_id, format!("workflow is already {status}")));
            }
        };

        let claimed = permit.is_none() && !state.awaiting_decision();
        if claimed {
            *permit = Some(self.claim_permit()?);
        }
        if let Err(err) = self.log.append(workflow_id, payload).await {
            if claimed {
                permit.take();
            }
            return Err(err);
        }
        Ok(())
    }

    fn claim_permit(&self) -> DomainResult<OwnedSemaphorePermit> {
        self.permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| DomainError::CapacityExceeded {
                limit: self.config.max_concurrent_workflows,
            })
    }

    fn spawn_driver(&self, workflow_id: Uuid, slot: ExecutionSlot, cancel: CancellationToken) -> JoinHandle<()> {
        let machine = StageMachine::new(
            workflow_id,
            self.log.clone(),
            self.agent.clone(),
            self.config.stage.clone(),
            cancel,
        )
        .with_slot(slot.clone());
        let log = self.log.clone();
        let drivers = self.drivers.clone();

        tokio::spawn(async move {
            match machine.run().await {
                Ok(status) => {
                    tracing::info!(workflow_id = %workflow_id, %status, "workflow driver finished");
                }
                Err(err) => {
                    tracing::error!(workflow_id = %workflow_id, error = %err, "workflow driver aborted");
                    let reason = format!("driver error: {err}");
                    if let Err(append_err) = log.append(workflow_id, EventPayload::WorkflowFailed { reason }).await {
                        tracing::error!(
                            workflow_id = %workflow_id,
                            error = %append_err,
                            "could not record driver failure"
                        );
                    }
                }
            }
            slot.release().await;
            drivers.lock().await.remove(&workflow_id);
        })
    }

    fn awaiting_approval(state: &WorkflowState) -> DomainResult<()> {
        if state.awaiting_decision() {
            Ok(())
        } else {
            Err(DomainError::conflict(
                state.workflow_id,
                format!("workflow is not awaiting approval (stage {})", state.current_stage),
            ))
        }
    }

    /// Record `PlanApproved` and hand the parked driver a slot for Develop.
    ///
    /// With the ceiling full this fails with
    /// [`DomainError::CapacityExceeded`] and appends nothing, leaving the
    /// workflow at the gate.
    pub async fn approve(&self, workflow_id: Uuid) -> DomainResult<()> {
        let slot = self.drivers.lock().await.get(&workflow_id).map(|d| d.slot.clone());
        let Some(slot) = slot else {
            // Undriven; `start` claims a slot when it picks the workflow up.
            return self.record_approval(workflow_id).await;
        };

        let mut permit = slot.lock().await;
        let claimed = permit.is_none();
        if claimed {
            Self::awaiting_approval(&self.log.state(workflow_id).await?)?;
            *permit = Some(self.claim_permit()?);
        }
        if let Err(err) = self.record_approval(workflow_id).await {
            if claimed {
                permit.take();
            }
            return Err(err);
        }
        Ok(())
    }

    async fn record_approval(&self, workflow_id: Uuid) -> DomainResult<()> {
        self.log
            .append_if(workflow_id, Self::awaiting_approval, EventPayload::PlanApproved)
            .await?;
        tracing::info!(workflow_id = %workflow_id, active = self.active_count(), "plan approved");
        Ok(())
    }

    /// Record `PlanRejected`, which fails the workflow.
    pub async fn reject(&self, workflow_id: Uuid, feedback: &str) -> DomainResult<()> {
        let feedback = feedback.trim();
        if feedback.is_empty() {
            return Err(DomainError::Validation("rejection feedback cannot be empty".to_string()));
        }
        self.log
            .append_if(
                workflow_id,
                Self::awaiting_approval,
                EventPayload::PlanRejected {
                    feedback: feedback.to_string(),
                },
            )
            .await?;
        tracing::info!(workflow_id = %workflow_id, "plan rejected");
        Ok(())
    }

    /// Record a terminal `WorkflowCancelled` and signal the driver.
    ///
    /// Already-applied Develop work is not rolled back.
    pub async fn cancel(&self, workflow_id: Uuid, reason: Option<String>) -> DomainResult<()> {
        self.log
            .append(workflow_id, EventPayload::WorkflowCancelled { reason })
            .await?;
        if let Some(driver) = self.drivers.lock().await.get(&workflow_id) {
            driver.cancel.cancel();
        }
        tracing::info!(workflow_id = %workflow_id, "workflow cancelled");
        Ok(())
    }

    /// Record and projection for one workflow.
    pub async fn status(&self, workflow_id: Uuid) -> DomainResult<WorkflowView> {
        let record = self.log.record(workflow_id).await?;
        let state = self.log.state(workflow_id).await?;
        Ok(WorkflowView { record, state })
    }

    /// Records, newest first, optionally filtered by status.
    pub async fn list(&self, status: Option<WorkflowStatus>) -> DomainResult<Vec<WorkflowRecord>> {
        self.log.list(status, None).await
    }

    /// Events after `after`, for replay and streaming catch-up.
    pub async fn events_since(&self, workflow_id: Uuid, after: u64) -> DomainResult<Vec<WorkflowEvent>> {
        self.log.events_since(workflow_id, after).await
    }

    /// Whether a driver is running or being started for the workflow.
    pub async fn is_driving(&self, workflow_id: Uuid) -> bool {
        self.drivers.lock().await.contains_key(&workflow_id)
    }

    /// Pick up workflows a previous process left `InProgress` or `Blocked`.
    ///
    /// Records are re-synced from their logs first. Under
    /// [`RecoveryPolicy::Resume`] workflows are re-driven; those parked at
    /// the approval gate need no slot, the others only while capacity
    /// lasts. The rest, or all of them under [`RecoveryPolicy::Fail`], are
    /// failed with reason `"interrupted"`.
    pub async fn recover(&self) -> DomainResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let mut candidates = Vec::new();
        for status in [WorkflowStatus::Pending, WorkflowStatus::InProgress, WorkflowStatus::Blocked] {
            candidates.extend(self.log.list(Some(status), None).await?);
        }
        candidates.sort_by_key(|r| r.created_at);

        for record in candidates {
            let state = self.log.resync(record.id).await?;
            if !state.status.is_active() || self.is_driving(record.id).await {
                continue;
            }

            if self.config.recovery == RecoveryPolicy::Resume {
                match self.start(record.id).await {
                    Ok(()) => {
                        tracing::info!(workflow_id = %record.id, stage = %state.current_stage, "workflow resumed");
                        report.resumed.push(record.id);
                        continue;
                    }
                    Err(DomainError::CapacityExceeded { .. }) => {
                        tracing::warn!(workflow_id = %record.id, "no capacity to resume workflow");
                    }
                    Err(err) => return Err(err),
                }
            }

            self.log
                .append(
                    record.id,
                    EventPayload::WorkflowFailed {
                        reason: INTERRUPTED.to_string(),
                    },
                )
                .await?;
            tracing::warn!(workflow_id = %record.id, "interrupted workflow marked failed");
            report.failed.push(record.id);
        }

        Ok(report)
    }

    /// Stop every driver without recording anything.
    ///
    /// Cancel tokens are left alone so the workflows stay resumable.
    pub async fn shutdown(&self) {
        let drained: Vec<(Uuid, Driver)> = self.drivers.lock().await.drain().collect();
        for (workflow_id, driver) in drained {
            let Some(handle) = driver.handle else {
                continue;
            };
            handle.abort();
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    tracing::warn!(workflow_id = %workflow_id, error = %err, "driver panicked during shutdown");
                }
            }
        }
        tracing::info!("coordinator stopped");
    }
}
