//! Common test utilities for integration tests
//!
//! Builds coordinators over in-memory or file-backed SQLite with a
//! scripted [`MockAgent`], plus polling helpers for asynchronous drivers.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use maestro::adapters::agents::MockAgent;
use maestro::adapters::sqlite::{
    create_migrated_test_pool, database_url, initialize_database, SqliteEventRepository,
    SqliteWorkflowRepository,
};
use maestro::adapters::trackers::NoneTracker;
use maestro::domain::models::{
    EventPayload, RecoveryPolicy, WorkflowEvent, WorkflowState, WorkflowStatus,
};
use maestro::services::{
    Coordinator, CoordinatorConfig, EventBus, EventLog, SchedulerConfig, StageSettings,
};
use sqlx::SqlitePool;
use uuid::Uuid;

const WAIT_LIMIT: Duration = Duration::from_secs(10);

pub struct Harness {
    pub coordinator: Coordinator,
    pub agent: Arc<MockAgent>,
    pub pool: SqlitePool,
}

/// Coordinator settings tuned for tests: short agent timeout, generous fan-out.
pub fn test_config(max_concurrent: usize) -> CoordinatorConfig {
    CoordinatorConfig {
        max_concurrent_workflows: max_concurrent,
        stage: StageSettings {
            scheduler: SchedulerConfig::new(4, 5),
            max_review_iterations: 3,
            review_failure_as_rejection: false,
        },
        recovery: RecoveryPolicy::Resume,
    }
}

/// Harness over a fresh in-memory database.
pub async fn harness(agent: MockAgent, config: CoordinatorConfig) -> Harness {
    let pool = create_migrated_test_pool().await.expect("test pool");
    harness_on(pool, Arc::new(agent), config)
}

/// Open (and migrate) a file-backed database.
pub async fn file_pool(path: &Path) -> SqlitePool {
    initialize_database(&database_url(&path.to_string_lossy()), None)
        .await
        .expect("file-backed pool")
}

/// Harness over an existing pool, as a restarted process would see it.
pub fn harness_on(pool: SqlitePool, agent: Arc<MockAgent>, config: CoordinatorConfig) -> Harness {
    let log = Arc::new(EventLog::new(
        Arc::new(SqliteEventRepository::new(pool.clone())),
        Arc::new(SqliteWorkflowRepository::new(pool.clone())),
        Arc::new(EventBus::default()),
    ));
    let coordinator = Coordinator::new(log, agent.clone(), Arc::new(NoneTracker), config);
    Harness {
        coordinator,
        agent,
        pool,
    }
}

/// Poll the projection until `predicate` holds.
pub async fn wait_for_state<F>(coordinator: &Coordinator, id: Uuid, mut predicate: F) -> WorkflowState
where
    F: FnMut(&WorkflowState) -> bool,
{
    let start = Instant::now();
    loop {
        let state = coordinator.log().state(id).await.expect("workflow state");
        if predicate(&state) {
            return state;
        }
        assert!(
            start.elapsed() < WAIT_LIMIT,
            "timed out waiting on workflow {id}: stage {}, status {}, reason {:?}",
            state.current_stage,
            state.status,
            state.failure_reason
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_status(coordinator: &Coordinator, id: Uuid, status: WorkflowStatus) -> WorkflowState {
    wait_for_state(coordinator, id, |s| s.status == status).await
}

/// Wait until the workflow is parked at the approval gate.
pub async fn wait_for_approval_gate(coordinator: &Coordinator, id: Uuid) -> WorkflowState {
    wait_for_state(coordinator, id, WorkflowState::awaiting_decision).await
}

/// Wait until exactly `count` workflows hold a slot.
pub async fn wait_for_active(coordinator: &Coordinator, count: usize) {
    let start = Instant::now();
    while coordinator.active_count() != count {
        assert!(
            start.elapsed() < WAIT_LIMIT,
            "expected {count} active workflows, have {}",
            coordinator.active_count()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the workflow's driver has exited and released its slot.
pub async fn wait_for_driver_exit(coordinator: &Coordinator, id: Uuid) {
    let start = Instant::now();
    while coordinator.is_driving(id).await {
        assert!(start.elapsed() < WAIT_LIMIT, "driver for {id} never exited");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn events(coordinator: &Coordinator, id: Uuid) -> Vec<WorkflowEvent> {
    coordinator.events_since(id, 0).await.expect("events")
}

pub fn count_events<F>(events: &[WorkflowEvent], mut predicate: F) -> usize
where
    F: FnMut(&EventPayload) -> bool,
{
    events.iter().filter(|e| predicate(&e.payload)).count()
}

/// Position of the first event matching `predicate`.
pub fn position<F>(events: &[WorkflowEvent], predicate: F) -> usize
where
    F: FnMut(&WorkflowEvent) -> bool,
{
    events.iter().position(predicate).expect("event present")
}
