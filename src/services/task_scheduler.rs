//! Develop-stage task scheduler.
//!
//! Dispatches ready tasks to the agent, concurrently up to a fan-out limit or
//! one at a time when the agent cannot run in parallel. Every dispatch,
//! completion and failure is appended to the event log before readiness is
//! re-evaluated, so the projection is the only scheduling state.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::{AgentError, DomainError, DomainResult};
use crate::domain::models::{EventPayload, Task, TaskId, WorkflowState};
use crate::domain::ports::{AgentCapability, AgentOutput, AgentStage, TaskOutcome};
use crate::services::event_log::EventLog;

/// Configuration for the task scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum tasks in flight at once when the agent supports parallelism.
    pub max_parallel: usize,
    /// Timeout for each agent call.
    pub agent_timeout: Duration,
}

impl SchedulerConfig {
    /// Build from configured values; the timeout is at least one second.
    pub fn new(max_parallel: usize, agent_timeout_secs: u64) -> Self {
        Self {
            max_parallel,
            agent_timeout: Duration::from_secs(agent_timeout_secs.max(1)),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            agent_timeout: Duration::from_secs(900),
        }
    }
}

/// How a scheduler run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevelopOutcome {
    /// Nothing is ready and nothing is in flight.
    Exhausted,
    /// The cancellation token fired; in-flight calls were detached.
    Cancelled,
}

/// Run one agent call on its own task, bounded by `limit`.
///
/// The call keeps running if the returned handle is dropped, which is how a
/// cancelled driver lets an in-flight call finish while discarding it.
pub(crate) fn spawn_agent_call(
    agent: Arc<dyn AgentCapability>,
    stage: AgentStage,
    state: WorkflowState,
    limit: Duration,
) -> JoinHandle<Result<AgentOutput, AgentError>> {
    let kind = stage.kind();
    tokio::spawn(async move {
        match tokio::time::timeout(limit, agent.generate(&stage, &state)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout {
                stage: kind,
                secs: limit.as_secs(),
            }),
        }
    })
}

/// Await a spawned agent call, folding a panic into an agent failure.
pub(crate) async fn join_agent_call(
    handle: JoinHandle<Result<AgentOutput, AgentError>>,
) -> Result<AgentOutput, AgentError> {
    handle
        .await
        .unwrap_or_else(|e| Err(AgentError::Failed(format!("agent call aborted: {e}"))))
}

/// Runs one Develop stage over a workflow's task graph.
pub struct TaskScheduler {
    workflow_id: Uuid,
    log: Arc<EventLog>,
    agent: Arc<dyn AgentCapability>,
    config: SchedulerConfig,
    cancel: CancellationToken,
}

impl TaskScheduler {
    pub fn new(
        workflow_id: Uuid,
        log: Arc<EventLog>,
        agent: Arc<dyn AgentCapability>,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            workflow_id,
            log,
            agent,
            config,
            cancel,
        }
    }

    fn fan_out(&self) -> usize {
        if self.agent.supports_parallel() {
            self.config.max_parallel.max(1)
        } else {
            1
        }
    }

    /// Drive the plan until no task can make progress.
    pub async fn run(&self) -> DomainResult<DevelopOutcome> {
        let fan_out = self.fan_out();
        let mut in_flight: JoinSet<(TaskId, Result<TaskOutcome, AgentError>)> = JoinSet::new();
        tracing::debug!(workflow_id = %self.workflow_id, fan_out, "develop stage started");

        loop {
            if self.cancel.is_cancelled() {
                in_flight.detach_all();
                return Ok(DevelopOutcome::Cancelled);
            }

            let state = self.log.state(self.workflow_id).await?;
            let ready: Vec<Task> = state
                .plan
                .as_ref()
                .map(|plan| plan.ready_tasks().into_iter().cloned().collect())
                .unwrap_or_default();

            for task in ready.into_iter().take(fan_out.saturating_sub(in_flight.len())) {
                if self.cancel.is_cancelled() {
                    break;
                }
                self.dispatch(task, &mut in_flight).await?;
            }

            if in_flight.is_empty() {
                return Ok(DevelopOutcome::Exhausted);
            }

            let joined = tokio::select! {
                () = self.cancel.cancelled() => {
                    in_flight.detach_all();
                    return Ok(DevelopOutcome::Cancelled);
                }
                joined = in_flight.join_next() => joined,
            };

            match joined {
                Some(Ok((task_id, result))) => {
                    if self.cancel.is_cancelled() {
                        in_flight.detach_all();
                        return Ok(DevelopOutcome::Cancelled);
                    }
                    self.record(task_id, result).await?;
                }
                Some(Err(e)) => {
                    tracing::error!(workflow_id = %self.workflow_id, error = %e, "task driver failed");
                }
                None => {}
            }
        }
    }

    async fn dispatch(
        &self,
        task: Task,
        in_flight: &mut JoinSet<(TaskId, Result<TaskOutcome, AgentError>)>,
    ) -> DomainResult<()> {
        let task_id = task.id.clone();
        let snapshot = self
            .log
            .append(
                self.workflow_id,
                EventPayload::TaskDispatched {
                    task_id: task_id.clone(),
                },
            )
            .await?;
        tracing::info!(workflow_id = %self.workflow_id, task_id = %task_id, "task dispatched");

        let call = spawn_agent_call(
            self.agent.clone(),
            AgentStage::Develop { task },
            snapshot,
            self.config.agent_timeout,
        );
        in_flight.spawn(async move {
            let result = join_agent_call(call).await.and_then(AgentOutput::into_task);
            (task_id, result)
        });
        Ok(())
    }

    async fn record(&self, task_id: TaskId, result: Result<TaskOutcome, AgentError>) -> DomainResult<()> {
        match result {
            Ok(outcome) => {
                tracing::info!(
                    workflow_id = %self.workflow_id,
                    task_id = %task_id,
                    files = outcome.files_changed.len(),
                    "task completed"
                );
                self.log
                    .append(
                        self.workflow_id,
                        EventPayload::TaskCompleted {
                            task_id,
                            files_changed: outcome.files_changed,
                            summary: outcome.summary,
                        },
                    )
                    .await?;
            }
            Err(error) => {
                let state = self.log.state(self.workflow_id).await?;
                let mut plan = state
                    .plan
                    .ok_or_else(|| DomainError::InvalidPlan("develop stage entered without a plan".to_string()))?;
                let blocked = plan.fail_task(&task_id)?;
                tracing::warn!(
                    workflow_id = %self.workflow_id,
                    task_id = %task_id,
                    blocked = blocked.len(),
                    error = %error,
                    "task failed"
                );
                self.log
                    .append(
                        self.workflow_id,
                        EventPayload::TaskFailed {
                            task_id,
                            error: error.to_string(),
                            blocked,
                        },
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::agents::{MockAgent, MockResponse};
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteEventRepository, SqliteWorkflowRepository,
    };
    use crate::domain::models::{Issue, PlannedTask, TaskGraph, TaskStatus, WorkflowRecord};
    use crate::services::event_bus::EventBus;

    async fn approved_workflow(plan: Vec<PlannedTask>) -> (Arc<EventLog>, Uuid) {
        let pool = create_migrated_test_pool().await.unwrap();
        let log = Arc::new(EventLog::new(
            Arc::new(SqliteEventRepository::new(pool.clone())),
            Arc::new(SqliteWorkflowRepository::new(pool)),
            Arc::new(EventBus::default()),
        ));
        let record = WorkflowRecord::new("1", None);
        log.create(&record, Issue::new("1", "t", "")).await.unwrap();
        log.append(record.id, EventPayload::WorkflowStarted).await.unwrap();
        log.append(
            record.id,
            EventPayload::PlanCreated {
                plan: TaskGraph::from_plan(plan).unwrap(),
                summary: String::new(),
            },
        )
        .await
        .unwrap();
        log.append(record.id, EventPayload::PlanApproved).await.unwrap();
        (log, record.id)
    }

    fn scheduler(log: &Arc<EventLog>, id: Uuid, agent: Arc<MockAgent>, max_parallel: usize) -> TaskScheduler {
        TaskScheduler::new(
            id,
            log.clone(),
            agent,
            SchedulerConfig {
                max_parallel,
                agent_timeout: Duration::from_secs(5),
            },
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_agent_timeout_has_a_floor() {
        assert_eq!(SchedulerConfig::new(2, 0).agent_timeout, Duration::from_secs(1));
        assert_eq!(SchedulerConfig::new(2, 30).agent_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_sequential_fallback_drains_in_graph_order() {
        let (log, id) = approved_workflow(vec![
            PlannedTask::new("c", "c", &["a"]),
            PlannedTask::new("b", "b", &[]),
            PlannedTask::new("a", "a", &[]),
        ])
        .await;
        let agent = Arc::new(MockAgent::new().sequential());

        let outcome = scheduler(&log, id, agent.clone(), 8).run().await.unwrap();
        assert_eq!(outcome, DevelopOutcome::Exhausted);
        assert_eq!(
            agent.dispatched_tasks().await,
            vec![TaskId::from("a"), TaskId::from("b"), TaskId::from("c")]
        );
        assert_eq!(agent.peak_concurrency(), 1);
        assert!(log.state(id).await.unwrap().plan.unwrap().is_settled());
    }

    #[tokio::test]
    async fn test_fan_out_is_bounded() {
        let plan = (0..6).map(|i| PlannedTask::new(format!("t{i}"), "work", &[])).collect();
        let (log, id) = approved_workflow(plan).await;
        let agent = Arc::new(
            MockAgent::new().with_default_response(MockResponse::success(["x.rs"]).with_delay(Duration::from_millis(20))),
        );

        scheduler(&log, id, agent.clone(), 2).run().await.unwrap();
        assert_eq!(agent.dispatched_tasks().await.len(), 6);
        assert!(agent.peak_concurrency() <= 2);
        let plan = log.state(id).await.unwrap().plan.unwrap();
        assert_eq!(plan.count(TaskStatus::Completed), 6);
    }

    #[tokio::test]
    async fn test_failure_records_one_event_and_skips_dependents() {
        let (log, id) = approved_workflow(vec![
            PlannedTask::new("a", "a", &[]),
            PlannedTask::new("b", "b", &["a"]),
            PlannedTask::new("c", "c", &["b"]),
            PlannedTask::new("d", "d", &[]),
        ])
        .await;
        let agent = Arc::new(MockAgent::new());
        agent.set_response_for_task("a", MockResponse::failure("boom")).await;

        scheduler(&log, id, agent.clone(), 4).run().await.unwrap();

        let dispatched = agent.dispatched_tasks().await;
        assert!(!dispatched.contains(&TaskId::from("b")));
        assert!(!dispatched.contains(&TaskId::from("c")));

        let failures: Vec<_> = log
            .events_since(id, 0)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::TaskFailed { task_id, blocked, .. } => Some((task_id, blocked)),
                _ => None,
            })
            .collect();
        assert_eq!(
            failures,
            vec![(TaskId::from("a"), vec![TaskId::from("b"), TaskId::from("c")])]
        );
        let plan = log.state(id).await.unwrap().plan.unwrap();
        assert_eq!(plan.count(TaskStatus::Failed), 3);
        assert_eq!(plan.count(TaskStatus::Completed), 1);
    }

    #[tokio::test]
    async fn test_timeout_fails_the_task() {
        let (log, id) = approved_workflow(vec![PlannedTask::new("slow", "slow", &[])]).await;
        let agent = Arc::new(MockAgent::new());
        agent
            .set_response_for_task("slow", MockResponse::success(["a.rs"]).with_delay(Duration::from_secs(5)))
            .await;
        let scheduler = TaskScheduler::new(
            id,
            log.clone(),
            agent,
            SchedulerConfig {
                max_parallel: 1,
                agent_timeout: Duration::from_millis(20),
            },
            CancellationToken::new(),
        );

        scheduler.run().await.unwrap();
        let plan = log.state(id).await.unwrap().plan.unwrap();
        assert_eq!(plan.get(&"slow".into()).unwrap().status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancel_discards_in_flight_result() {
        let (log, id) = approved_workflow(vec![PlannedTask::new("a", "a", &[])]).await;
        let agent = Arc::new(
            MockAgent::new().with_default_response(MockResponse::success(["a.rs"]).with_delay(Duration::from_millis(200))),
        );
        let cancel = CancellationToken::new();
        let scheduler = TaskScheduler::new(id, log.clone(), agent, SchedulerConfig::default(), cancel.clone());

        let run = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        assert_eq!(run.await.unwrap().unwrap(), DevelopOutcome::Cancelled);
        tokio::time::sleep(Duration::from_millis(250)).await;
        let plan = log.state(id).await.unwrap().plan.unwrap();
        assert_eq!(plan.get(&"a".into()).unwrap().status, TaskStatus::InProgress);
    }
}
