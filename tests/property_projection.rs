use maestro::domain::models::{
    EventPayload, Issue, PlannedTask, ReviewResult, ReviewSeverity, TaskGraph, TaskId,
    TaskStatus, WorkflowEvent, WorkflowState,
};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::HashSet;
use uuid::Uuid;

fn plan_created() -> EventPayload {
    let plan = TaskGraph::from_plan(vec![
        PlannedTask::new("t0", "t0", &[]),
        PlannedTask::new("t1", "t1", &["t0"]),
        PlannedTask::new("t2", "t2", &[]),
    ])
    .expect("valid plan");
    EventPayload::PlanCreated {
        plan,
        summary: "three tasks".to_string(),
    }
}

fn task_id() -> impl Strategy<Value = TaskId> {
    (0u8..4).prop_map(|n| TaskId::from(format!("t{n}").as_str()))
}

fn payload() -> impl Strategy<Value = EventPayload> {
    prop_oneof![
        Just(EventPayload::WorkflowStarted),
        Just(plan_created()),
        Just(EventPayload::PlanApproved),
        task_id().prop_map(|task_id| EventPayload::TaskDispatched { task_id }),
        task_id().prop_map(|task_id| EventPayload::TaskCompleted {
            task_id,
            files_changed: vec!["src/lib.rs".to_string()],
            summary: "done".to_string(),
        }),
        (task_id(), task_id()).prop_map(|(task_id, other)| EventPayload::TaskFailed {
            task_id,
            error: "boom".to_string(),
            blocked: vec![other],
        }),
        Just(EventPayload::DevelopmentFinished),
        any::<bool>().prop_map(|approved| EventPayload::ReviewCompleted {
            result: if approved {
                ReviewResult::approved()
            } else {
                ReviewResult::changes_requested("nit", ReviewSeverity::Low)
            },
        }),
        (1u32..5).prop_map(|iteration| EventPayload::RevisionStarted { iteration }),
        Just(EventPayload::WorkflowCompleted),
        Just(EventPayload::WorkflowFailed {
            reason: "boom".to_string()
        }),
    ]
}

fn event_log(id: Uuid, payloads: Vec<EventPayload>) -> Vec<WorkflowEvent> {
    let created = EventPayload::WorkflowCreated {
        issue: Issue::new("octo/repo#1", "Title", ""),
        issue_ref: "octo/repo#1".to_string(),
        worktree_ref: None,
    };
    std::iter::once(created)
        .chain(payloads)
        .enumerate()
        .map(|(i, p)| WorkflowEvent::new(id, i as u64 + 1, p))
        .collect()
}

/// Acyclic plans: task `i` may only depend on tasks `j < i`.
fn acyclic_plan() -> impl Strategy<Value = (Vec<PlannedTask>, Vec<bool>)> {
    (1usize..12).prop_flat_map(|n| {
        (
            prop::collection::vec(prop::collection::vec(any::<bool>(), n), n),
            prop::collection::vec(prop::bool::weighted(0.2), n),
        )
            .prop_map(move |(edges, failures)| {
                let tasks = (0..n)
                    .map(|i| {
                        let deps: Vec<String> =
                            (0..i).filter(|&j| edges[i][j]).map(|j| format!("t{j}")).collect();
                        let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
                        PlannedTask::new(format!("t{i}").as_str(), "generated", &deps)
                    })
                    .collect();
                (tasks, failures)
            })
    })
}

proptest! {
    /// Replaying the same log always yields the same state.
    #[test]
    fn prop_replay_is_deterministic(payloads in prop::collection::vec(payload(), 0..40)) {
        let id = Uuid::new_v4();
        let events = event_log(id, payloads);
        prop_assert_eq!(WorkflowState::replay(id, &events), WorkflowState::replay(id, &events));
    }

    /// Folding events one at a time matches a batch replay at every prefix.
    #[test]
    fn prop_incremental_matches_replay(payloads in prop::collection::vec(payload(), 0..40)) {
        let id = Uuid::new_v4();
        let events = event_log(id, payloads);
        let mut state = WorkflowState::new(id);
        for (i, event) in events.iter().enumerate() {
            state.apply(event);
            prop_assert_eq!(&state, &WorkflowState::replay(id, &events[..=i]));
        }
        prop_assert_eq!(state.last_sequence, events.len() as u64);
    }

    /// Re-delivering an already applied event changes nothing.
    #[test]
    fn prop_redelivery_is_ignored(
        payloads in prop::collection::vec(payload(), 1..30),
        pick in any::<prop::sample::Index>(),
    ) {
        let id = Uuid::new_v4();
        let events = event_log(id, payloads);
        let mut state = WorkflowState::replay(id, &events);
        let before = state.clone();
        state.apply(&events[pick.index(events.len())]);
        prop_assert_eq!(state, before);
    }

    /// Driving any acyclic plan settles it, and a task ends `Failed`
    /// exactly when it or one of its ancestors was scripted to fail.
    #[test]
    fn prop_scheduling_settles_with_cascade((tasks, failures) in acyclic_plan()) {
        let n = tasks.len();
        let mut graph = TaskGraph::from_plan(tasks.clone())
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        let mut rounds = 0;
        while !graph.is_settled() {
            rounds += 1;
            prop_assert!(rounds <= n, "plan did not settle in {} rounds", n);
            let ready: Vec<TaskId> = graph.ready_tasks().iter().map(|t| t.id.clone()).collect();
            prop_assert!(!ready.is_empty(), "unsettled plan with nothing ready");
            for id in ready {
                // An earlier failure this round may already have blocked it.
                if graph.get(&id).map(|t| t.status) != Some(TaskStatus::Pending) {
                    continue;
                }
                graph.start_task(&id).map_err(|e| TestCaseError::fail(e.to_string()))?;
                let index: usize = id.as_str()[1..].parse().unwrap();
                if failures[index] {
                    graph.fail_task(&id).map_err(|e| TestCaseError::fail(e.to_string()))?;
                } else {
                    graph
                        .complete_task(&id, Vec::new())
                        .map_err(|e| TestCaseError::fail(e.to_string()))?;
                }
            }
        }

        let mut doomed: HashSet<usize> = HashSet::new();
        for (i, task) in tasks.iter().enumerate() {
            let inherited = task
                .dependencies
                .iter()
                .any(|d| doomed.contains(&d.as_str()[1..].parse::<usize>().unwrap()));
            if failures[i] || inherited {
                doomed.insert(i);
            }
        }
        for i in 0..n {
            let status = graph.get(&TaskId::from(format!("t{i}").as_str())).unwrap().status;
            let expected = if doomed.contains(&i) { TaskStatus::Failed } else { TaskStatus::Completed };
            prop_assert_eq!(status, expected, "task t{}", i);
        }
    }
}
