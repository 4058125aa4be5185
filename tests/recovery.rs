//! Restart recovery over a file-backed database.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use maestro::adapters::agents::MockAgent;
use maestro::domain::models::{
    AgentStageKind, EventPayload, PlannedTask, RecoveryPolicy, Stage, TaskId, WorkflowStatus,
};
use maestro::services::INTERRUPTED;
use tempfile::TempDir;

async fn restart(dir: &TempDir, agent: MockAgent, config: maestro::CoordinatorConfig) -> Harness {
    let pool = file_pool(&dir.path().join("maestro.db")).await;
    harness_on(pool, Arc::new(agent), config)
}

async fn stop(h: Harness) {
    h.coordinator.shutdown().await;
    h.pool.close().await;
}

#[tokio::test]
async fn test_resume_workflow_parked_at_gate() {
    let dir = TempDir::new().unwrap();
    let first = restart(&dir, MockAgent::new(), test_config(2)).await;
    let id = first.coordinator.submit("octo/repo#1", None).await.unwrap();
    first.coordinator.start(id).await.unwrap();
    wait_for_approval_gate(&first.coordinator, id).await;
    stop(first).await;

    let second = restart(&dir, MockAgent::new(), test_config(2)).await;
    let c = &second.coordinator;
    let report = c.recover().await.unwrap();
    assert_eq!(report.resumed, vec![id]);
    assert!(report.failed.is_empty());
    assert!(c.is_driving(id).await);
    assert_eq!(c.active_count(), 0);

    // The plan is not regenerated on resume.
    let state = wait_for_approval_gate(c, id).await;
    assert_eq!(state.current_stage, Stage::Approve);
    assert!(second.agent.calls().await.is_empty());

    c.approve(id).await.unwrap();
    wait_for_status(c, id, WorkflowStatus::Completed).await;

    let events = events(c, id).await;
    assert_eq!(
        count_events(&events, |p| matches!(p, EventPayload::WorkflowResumed { stage: Stage::Approve })),
        1
    );
    assert_eq!(count_events(&events, |p| matches!(p, EventPayload::PlanCreated { .. })), 1);
    stop(second).await;
}

#[tokio::test]
async fn test_interrupted_dispatch_runs_again() {
    let dir = TempDir::new().unwrap();
    let plan = vec![
        PlannedTask::new("a", "schema", &[]),
        PlannedTask::new("b", "handlers", &["a"]),
    ];
    let first = restart(&dir, MockAgent::new().with_plan(plan.clone()), test_config(1)).await;
    first
        .agent
        .set_delay(AgentStageKind::Develop, Duration::from_secs(30))
        .await;
    let id = first.coordinator.submit("octo/repo#2", None).await.unwrap();
    first.coordinator.start(id).await.unwrap();
    wait_for_approval_gate(&first.coordinator, id).await;
    first.coordinator.approve(id).await.unwrap();
    wait_for_state(&first.coordinator, id, |s| {
        s.plan
            .as_ref()
            .and_then(|p| p.get(&TaskId::from("a")))
            .is_some_and(|t| t.status == maestro::TaskStatus::InProgress)
    })
    .await;
    stop(first).await;

    let second = restart(&dir, MockAgent::new().with_plan(plan), test_config(1)).await;
    let c = &second.coordinator;
    let report = c.recover().await.unwrap();
    assert_eq!(report.resumed, vec![id]);

    wait_for_status(c, id, WorkflowStatus::Completed).await;
    assert_eq!(
        second.agent.dispatched_tasks().await,
        vec![TaskId::from("a"), TaskId::from("b")]
    );

    let events = events(c, id).await;
    assert_eq!(
        count_events(&events, |p| matches!(p, EventPayload::TaskDispatched { task_id } if task_id.as_str() == "a")),
        2
    );
    let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, (1..=events.len() as u64).collect::<Vec<_>>());
    stop(second).await;
}

#[tokio::test]
async fn test_fail_policy_marks_interrupted() {
    let dir = TempDir::new().unwrap();
    let first = restart(&dir, MockAgent::new(), test_config(2)).await;
    let parked = first.coordinator.submit("octo/repo#3", None).await.unwrap();
    let pending = first.coordinator.submit("octo/repo#4", None).await.unwrap();
    first.coordinator.start(parked).await.unwrap();
    wait_for_approval_gate(&first.coordinator, parked).await;
    stop(first).await;

    let mut config = test_config(2);
    config.recovery = RecoveryPolicy::Fail;
    let second = restart(&dir, MockAgent::new(), config).await;
    let c = &second.coordinator;
    let report = c.recover().await.unwrap();
    assert!(report.resumed.is_empty());
    assert_eq!(report.failed, vec![parked]);
    assert_eq!(c.active_count(), 0);

    let view = c.status(parked).await.unwrap();
    assert_eq!(view.record.status, WorkflowStatus::Failed);
    assert_eq!(view.state.failure_reason.as_deref(), Some(INTERRUPTED));
    // Never-started workflows are left for an explicit start.
    assert_eq!(c.status(pending).await.unwrap().record.status, WorkflowStatus::Pending);
    stop(second).await;
}

#[tokio::test]
async fn test_resume_is_capped_by_capacity() {
    let dir = TempDir::new().unwrap();
    let slow_develop = || async {
        let agent = MockAgent::new();
        agent.set_delay(AgentStageKind::Develop, Duration::from_secs(30)).await;
        agent
    };
    let first = restart(&dir, slow_develop().await, test_config(3)).await;
    let mut ids = Vec::new();
    for n in 5..8 {
        ids.push(first.coordinator.submit(&format!("octo/repo#{n}"), None).await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let (older, newer, parked) = (ids[0], ids[1], ids[2]);
    for id in [older, newer] {
        first.coordinator.start(id).await.unwrap();
        wait_for_approval_gate(&first.coordinator, id).await;
        first.coordinator.approve(id).await.unwrap();
    }
    first.coordinator.start(parked).await.unwrap();
    wait_for_approval_gate(&first.coordinator, parked).await;
    stop(first).await;

    // One slot: the older in-progress workflow takes it, the parked one
    // needs none.
    let second = restart(&dir, slow_develop().await, test_config(1)).await;
    let c = &second.coordinator;
    let report = c.recover().await.unwrap();
    assert_eq!(report.resumed, vec![older, parked]);
    assert_eq!(report.failed, vec![newer]);
    assert_eq!(c.active_count(), 1);
    assert_eq!(
        c.status(newer).await.unwrap().state.failure_reason.as_deref(),
        Some(INTERRUPTED)
    );
    assert!(c.status(parked).await.unwrap().state.awaiting_decision());
    stop(second).await;
}

#[tokio::test]
async fn test_recover_with_nothing_to_do() {
    let dir = TempDir::new().unwrap();
    let h = restart(&dir, MockAgent::new(), test_config(1)).await;
    let report = h.coordinator.recover().await.unwrap();
    assert!(report.resumed.is_empty() && report.failed.is_empty());
    stop(h).await;
}
