//! Per-workflow stage driver.
//!
//! Each stage reads the projection, does its work, and appends the event
//! that moves the workflow on. The driver never keeps stage state of its
//! own, so re-entering after a crash is just calling [`StageMachine::run`]
//! again on the replayed log.

use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, MutexGuard, OwnedSemaphorePermit};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::{AgentError, DomainError, DomainResult};
use crate::domain::models::{
    AgentStageKind, EventPayload, ReviewResult, Stage, TaskGraph, TaskStatus, WorkflowState,
    WorkflowStatus,
};
use crate::domain::ports::{AgentCapability, AgentOutput, AgentStage};
use crate::services::event_log::EventLog;
use crate::services::task_scheduler::{
    join_agent_call, spawn_agent_call, DevelopOutcome, SchedulerConfig, TaskScheduler,
};

/// Knobs for one workflow's run.
#[derive(Debug, Clone)]
pub struct StageSettings {
    /// Develop-stage fan-out and agent timeout.
    pub scheduler: SchedulerConfig,
    /// Rejected reviews tolerated before the workflow fails.
    pub max_review_iterations: u32,
    /// Loop back to Develop when the review agent itself fails.
    pub review_failure_as_rejection: bool,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            max_review_iterations: 3,
            review_failure_as_rejection: false,
        }
    }
}

/// A driver's share of the concurrency ceiling.
///
/// Empty while the workflow is parked at the approval gate, so parked
/// workflows do not count against the ceiling. Whoever changes the permit
/// holds the slot lock while checking the projection.
#[derive(Debug, Clone, Default)]
pub struct ExecutionSlot {
    permit: Arc<Mutex<Option<OwnedSemaphorePermit>>>,
}

impl ExecutionSlot {
    /// A slot already holding `permit`.
    pub fn holding(permit: OwnedSemaphorePermit) -> Self {
        Self {
            permit: Arc::new(Mutex::new(Some(permit))),
        }
    }

    /// Lock the slot to inspect or replace its permit.
    pub async fn lock(&self) -> MutexGuard<'_, Option<OwnedSemaphorePermit>> {
        self.permit.lock().await
    }

    /// Whether the slot currently counts against the ceiling.
    pub async fn is_held(&self) -> bool {
        self.permit.lock().await.is_some()
    }

    /// Give the permit back to the ceiling. Returns whether one was held.
    pub async fn release(&self) -> bool {
        self.permit.lock().await.take().is_some()
    }
}

/// Drives one workflow through its stages.
pub struct StageMachine {
    workflow_id: Uuid,
    log: Arc<EventLog>,
    agent: Arc<dyn AgentCapability>,
    settings: StageSettings,
    cancel: CancellationToken,
    slot: ExecutionSlot,
}

impl StageMachine {
    /// Machine for `workflow_id`; stops when `cancel` fires.
    pub fn new(
        workflow_id: Uuid,
        log: Arc<EventLog>,
        agent: Arc<dyn AgentCapability>,
        settings: StageSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            workflow_id,
            log,
            agent,
            settings,
            cancel,
            slot: ExecutionSlot::default(),
        }
    }

    /// Release `slot` while parked at the approval gate.
    #[must_use]
    pub fn with_slot(mut self, slot: ExecutionSlot) -> Self {
        self.slot = slot;
        self
    }

    /// Drive the workflow until it is terminal or cancelled.
    ///
    /// Returns the status the workflow was left in.
    pub async fn run(&self) -> DomainResult<WorkflowStatus> {
        loop {
            let state = self.log.state(self.workflow_id).await?;
            if state.is_terminal() {
                return Ok(state.status);
            }
            if self.cancel.is_cancelled() {
                return Ok(WorkflowStatus::Cancelled);
            }

            tracing::debug!(workflow_id = %self.workflow_id, stage = %state.current_stage, "entering stage");
            let step = match state.current_stage {
                Stage::Plan => self.plan(&state).await,
                Stage::Approve => self.await_decision().await,
                Stage::Develop => self.develop().await,
                Stage::Review => self.review(&state).await,
                Stage::Done | Stage::Failed => return Ok(state.status),
            };

            if let Err(err) = step {
                // Lost a race with cancel or another terminal append.
                if matches!(err, DomainError::Conflict { .. }) {
                    let state = self.log.state(self.workflow_id).await?;
                    if state.is_terminal() {
                        return Ok(state.status);
                    }
                }
                return Err(err);
            }
        }
    }

    async fn append(&self, payload: EventPayload) -> DomainResult<WorkflowState> {
        self.log.append(self.workflow_id, payload).await
    }

    async fn fail(&self, reason: String) -> DomainResult<()> {
        tracing::warn!(workflow_id = %self.workflow_id, %reason, "workflow failed");
        self.append(EventPayload::WorkflowFailed { reason }).await?;
        Ok(())
    }

    async fn agent_failed(&self, stage: AgentStageKind, error: &AgentError) -> DomainResult<()> {
        tracing::warn!(workflow_id = %self.workflow_id, %stage, %error, "agent call failed");
        self.append(EventPayload::AgentFailed {
            stage,
            error: error.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Call the agent, returning `None` if cancelled first.
    async fn call_agent(&self, stage: AgentStage, state: &WorkflowState) -> Option<Result<AgentOutput, AgentError>> {
        let handle = spawn_agent_call(
            self.agent.clone(),
            stage,
            state.clone(),
            self.settings.scheduler.agent_timeout,
        );
        tokio::select! {
            () = self.cancel.cancelled() => None,
            result = join_agent_call(handle) => {
                if self.cancel.is_cancelled() { None } else { Some(result) }
            }
        }
    }

    async fn plan(&self, state: &WorkflowState) -> DomainResult<()> {
        let Some(result) = self.call_agent(AgentStage::Plan, state).await else {
            return Ok(());
        };

        let plan = result.and_then(AgentOutput::into_plan).map_err(DomainError::from).and_then(
            |(tasks, summary)| TaskGraph::from_plan(tasks).map(|graph| (graph, summary)),
        );

        match plan {
            Ok((plan, summary)) => {
                tracing::info!(workflow_id = %self.workflow_id, tasks = plan.len(), "plan created");
                self.append(EventPayload::PlanCreated { plan, summary }).await?;
                Ok(())
            }
            Err(DomainError::Agent(error)) => {
                self.agent_failed(AgentStageKind::Plan, &error).await?;
                self.fail(format!("plan stage failed: {error}")).await
            }
            Err(err @ (DomainError::InvalidPlan(_) | DomainError::DependencyCycle(_))) => {
                let error = AgentError::Failed(err.to_string());
                self.agent_failed(AgentStageKind::Plan, &error).await?;
                self.fail(format!("plan stage failed: {err}")).await
            }
            Err(err) => Err(err),
        }
    }

    /// Wait for approve/reject without holding any lock or ceiling slot.
    ///
    /// An approval that lands before the slot is released has already
    /// claimed it for Develop, so the permit is only dropped while the
    /// projection still awaits a decision.
    async fn await_decision(&self) -> DomainResult<()> {
        {
            let mut permit = self.slot.lock().await;
            if self.log.state(self.workflow_id).await?.awaiting_decision() && permit.take().is_some() {
                tracing::debug!(workflow_id = %self.workflow_id, "execution slot released at approval gate");
            }
        }

        // Subscribe before checking so a decision in between is not missed.
        let mut events = self.log.bus().subscribe_to(self.workflow_id);
        tracing::info!(workflow_id = %self.workflow_id, "awaiting plan approval");
        loop {
            let state = self.log.state(self.workflow_id).await?;
            if !state.awaiting_decision() {
                return Ok(());
            }
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                received = events.recv() => match received {
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => {
                        return Err(DomainError::Repository("event bus closed".to_string()));
                    }
                },
            }
        }
    }

    async fn develop(&self) -> DomainResult<()> {
        let scheduler = TaskScheduler::new(
            self.workflow_id,
            self.log.clone(),
            self.agent.clone(),
            self.settings.scheduler.clone(),
            self.cancel.clone(),
        );
        if scheduler.run().await? == DevelopOutcome::Cancelled {
            return Ok(());
        }

        let state = self.log.state(self.workflow_id).await?;
        let Some(plan) = state.plan.as_ref() else {
            return self.fail("develop stage entered without a plan".to_string()).await;
        };

        if !plan.is_settled() {
            let unresolved = plan.count(TaskStatus::Pending) + plan.count(TaskStatus::InProgress);
            return self
                .fail(format!("scheduler deadlock: {unresolved} task(s) unresolved"))
                .await;
        }

        let failed = plan.failed_tasks();
        if !failed.is_empty() {
            let ids: Vec<String> = failed.iter().map(ToString::to_string).collect();
            return self.fail(format!("tasks failed: {}", ids.join(", "))).await;
        }

        self.append(EventPayload::DevelopmentFinished).await?;
        Ok(())
    }

    async fn review(&self, state: &WorkflowState) -> DomainResult<()> {
        if state.review_recorded {
            // Verdict was recorded but not acted on before a restart.
            if let Some(result) = state.review_results.last() {
                return self.apply_verdict(result, state).await;
            }
        }

        let files_changed = state.plan.as_ref().map(TaskGraph::files_changed).unwrap_or_default();
        let Some(result) = self.call_agent(AgentStage::Review { files_changed }, state).await else {
            return Ok(());
        };

        match result.and_then(AgentOutput::into_review) {
            Ok(verdict) => {
                tracing::info!(
                    workflow_id = %self.workflow_id,
                    approved = verdict.approved,
                    severity = verdict.severity.as_str(),
                    "review completed"
                );
                let state = self
                    .append(EventPayload::ReviewCompleted {
                        result: verdict.clone(),
                    })
                    .await?;
                self.apply_verdict(&verdict, &state).await
            }
            Err(error) => {
                self.agent_failed(AgentStageKind::Review, &error).await?;
                if self.settings.review_failure_as_rejection {
                    self.revise(state).await
                } else {
                    self.fail(format!("review stage failed: {error}")).await
                }
            }
        }
    }

    async fn apply_verdict(&self, verdict: &ReviewResult, state: &WorkflowState) -> DomainResult<()> {
        if verdict.approved {
            self.append(EventPayload::WorkflowCompleted).await?;
            tracing::info!(workflow_id = %self.workflow_id, "workflow completed");
            Ok(())
        } else {
            self.revise(state).await
        }
    }

    async fn revise(&self, state: &WorkflowState) -> DomainResult<()> {
        let iteration = state.revision_count + 1;
        if iteration > self.settings.max_review_iterations {
            return self
                .fail(format!(
                    "revision limit reached: review rejected {iteration} time(s), limit is {}",
                    self.settings.max_review_iterations
                ))
                .await;
        }
        tracing::info!(workflow_id = %self.workflow_id, iteration, "revision started");
        self.append(EventPayload::RevisionStarted { iteration }).await?;
        Ok(())
    }
}
