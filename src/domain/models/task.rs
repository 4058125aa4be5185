//! Task domain model.
//!
//! Tasks are atomic units of work inside the Develop stage. They form a
//! directed acyclic graph through their dependency sets; acyclicity is
//! checked once when the graph is built and never re-validated.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::domain::errors::{DomainError, DomainResult};

/// Identifier of a task within one plan.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// The identifier as written in the plan.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a task in the Develop stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dispatch (dependencies may or may not be met)
    #[default]
    Pending,
    /// Dispatched to an agent
    InProgress,
    /// Finished successfully
    Completed,
    /// Failed, or blocked by a failed dependency. Permanent.
    Failed,
}

impl TaskStatus {
    /// Wire name, as used in events and tables.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed or failed; no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task as proposed by the planning agent, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedTask {
    pub id: TaskId,
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
}

impl PlannedTask {
    /// Build a planned task from borrowed dependency ids.
    pub fn new(id: impl Into<TaskId>, description: impl Into<String>, dependencies: &[&str]) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            dependencies: dependencies.iter().map(|d| TaskId::from(*d)).collect(),
        }
    }
}

/// An atomic unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    #[serde(default)]
    pub dependencies: BTreeSet<TaskId>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub files_changed: Vec<String>,
}

impl Task {
    /// A pending task with no dependencies.
    pub fn new(id: impl Into<TaskId>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            dependencies: BTreeSet::new(),
            status: TaskStatus::Pending,
            files_changed: Vec::new(),
        }
    }

    /// Replace the dependency set.
    pub fn with_dependencies<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }
}

impl From<PlannedTask> for Task {
    fn from(planned: PlannedTask) -> Self {
        Task::new(planned.id, planned.description).with_dependencies(planned.dependencies)
    }
}

// Standalone helper for cycle detection (no self needed)
fn detect_cycle_util<'a>(
    node: &'a TaskId,
    graph: &HashMap<&'a TaskId, Vec<&'a TaskId>>,
    visited: &mut HashSet<&'a TaskId>,
    rec_stack: &mut HashSet<&'a TaskId>,
    path: &mut Vec<&'a TaskId>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = graph.get(node) {
        for &neighbor in neighbors {
            if !visited.contains(neighbor) {
                if detect_cycle_util(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(neighbor) {
                if let Some(cycle_start) = path.iter().position(|&id| id == neighbor) {
                    path.drain(0..cycle_start);
                    path.push(neighbor);
                    return true;
                }
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    false
}

/// Ordered collection of tasks plus their dependency edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskGraph {
    tasks: Vec<Task>,
}

impl TaskGraph {
    /// Build a graph from a planning agent's proposal.
    ///
    /// Rejects empty plans in addition to the structural checks of [`TaskGraph::new`].
    pub fn from_plan(planned: Vec<PlannedTask>) -> DomainResult<Self> {
        if planned.is_empty() {
            return Err(DomainError::InvalidPlan("plan contains no tasks".to_string()));
        }
        Self::new(planned.into_iter().map(Task::from).collect())
    }

    /// Build a graph, validating ids, dependency references, and acyclicity.
    pub fn new(tasks: Vec<Task>) -> DomainResult<Self> {
        let mut seen = HashSet::new();
        for task in &tasks {
            if task.id.0.trim().is_empty() {
                return Err(DomainError::InvalidPlan("task id cannot be empty".to_string()));
            }
            if !seen.insert(&task.id) {
                return Err(DomainError::InvalidPlan(format!("duplicate task id '{}'", task.id)));
            }
        }
        for task in &tasks {
            for dep in &task.dependencies {
                if dep == &task.id {
                    return Err(DomainError::DependencyCycle(vec![dep.clone(), dep.clone()]));
                }
                if !seen.contains(dep) {
                    return Err(DomainError::InvalidPlan(format!(
                        "task '{}' depends on unknown task '{}'",
                        task.id, dep
                    )));
                }
            }
        }

        let graph = Self { tasks };
        if let Some(cycle) = graph.detect_cycle() {
            return Err(DomainError::DependencyCycle(cycle));
        }
        Ok(graph)
    }

    fn detect_cycle(&self) -> Option<Vec<TaskId>> {
        let graph: HashMap<&TaskId, Vec<&TaskId>> = self
            .tasks
            .iter()
            .map(|t| (&t.id, t.dependencies.iter().collect()))
            .collect();

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for task in &self.tasks {
            if !visited.contains(&task.id)
                && detect_cycle_util(&task.id, &graph, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(path.into_iter().cloned().collect());
            }
        }
        None
    }

    /// Tasks in plan order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub(crate) fn tasks_mut(&mut self) -> &mut [Task] {
        &mut self.tasks
    }

    /// Number of tasks in the plan.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the plan has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Look a task up by id.
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    fn get_mut(&mut self, id: &TaskId) -> DomainResult<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| DomainError::Validation(format!("unknown task '{id}'")))
    }

    fn status_of(&self, id: &TaskId) -> Option<TaskStatus> {
        self.get(id).map(|t| t.status)
    }

    fn dependencies_completed(&self, task: &Task) -> bool {
        task.dependencies
            .iter()
            .all(|dep| self.status_of(dep) == Some(TaskStatus::Completed))
    }

    /// Length of the longest dependency chain below each task.
    fn depths(&self) -> HashMap<&TaskId, usize> {
        fn depth_of<'a>(
            graph: &'a TaskGraph,
            id: &'a TaskId,
            memo: &mut HashMap<&'a TaskId, usize>,
        ) -> usize {
            if let Some(&d) = memo.get(id) {
                return d;
            }
            let d = graph
                .get(id)
                .map(|t| {
                    t.dependencies
                        .iter()
                        .map(|dep| depth_of(graph, dep, memo) + 1)
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);
            memo.insert(id, d);
            d
        }

        let mut memo = HashMap::new();
        for task in &self.tasks {
            depth_of(self, &task.id, &mut memo);
        }
        memo
    }

    /// Every `Pending` task whose dependencies are all `Completed`.
    ///
    /// Returned in graph order: shallower tasks first, ties broken by task id.
    pub fn ready_tasks(&self) -> Vec<&Task> {
        let depths = self.depths();
        let mut ready: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && self.dependencies_completed(t))
            .collect();
        ready.sort_by(|a, b| {
            depths[&a.id]
                .cmp(&depths[&b.id])
                .then_with(|| a.id.cmp(&b.id))
        });
        ready
    }

    /// Every task reachable from `id` through dependency edges, in graph order.
    pub fn transitive_dependents(&self, id: &TaskId) -> Vec<TaskId> {
        let mut reached: HashSet<&TaskId> = HashSet::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for task in &self.tasks {
                if task.dependencies.contains(current) && reached.insert(&task.id) {
                    queue.push_back(&task.id);
                }
            }
        }
        self.tasks
            .iter()
            .filter(|t| reached.contains(&t.id))
            .map(|t| t.id.clone())
            .collect()
    }

    /// Move a task to `InProgress`. Only legal for a ready task.
    pub fn start_task(&mut self, id: &TaskId) -> DomainResult<()> {
        let ready = {
            let task = self
                .get(id)
                .ok_or_else(|| DomainError::Validation(format!("unknown task '{id}'")))?;
            task.status == TaskStatus::Pending && self.dependencies_completed(task)
        };
        if !ready {
            return Err(DomainError::Validation(format!("task '{id}' is not ready")));
        }
        self.get_mut(id)?.status = TaskStatus::InProgress;
        Ok(())
    }

    /// Mark a task completed with the files it touched.
    pub fn complete_task(&mut self, id: &TaskId, files_changed: Vec<String>) -> DomainResult<()> {
        let task = self.get_mut(id)?;
        task.status = TaskStatus::Completed;
        task.files_changed = files_changed;
        Ok(())
    }

    /// Fail a task and cascade the failure to every transitive dependent.
    ///
    /// Returns the dependents that were newly blocked.
    pub fn fail_task(&mut self, id: &TaskId) -> DomainResult<Vec<TaskId>> {
        self.get_mut(id)?.status = TaskStatus::Failed;
        let dependents = self.transitive_dependents(id);
        let mut blocked = Vec::new();
        for dep in dependents {
            let task = self.get_mut(&dep)?;
            if task.status != TaskStatus::Failed {
                task.status = TaskStatus::Failed;
                blocked.push(dep);
            }
        }
        Ok(blocked)
    }

    /// Mark tasks failed without cascading (used when replaying recorded cascades).
    pub fn mark_failed(&mut self, ids: &[TaskId]) {
        for task in &mut self.tasks {
            if ids.contains(&task.id) {
                task.status = TaskStatus::Failed;
            }
        }
    }

    /// Re-open completed tasks for a revision round. Failed tasks stay failed.
    pub fn reopen_completed(&mut self) {
        for task in &mut self.tasks {
            if task.status == TaskStatus::Completed {
                task.status = TaskStatus::Pending;
            }
        }
    }

    /// Return interrupted dispatches to `Pending` so they run again.
    pub fn requeue_in_progress(&mut self) {
        for task in &mut self.tasks {
            if task.status == TaskStatus::InProgress {
                task.status = TaskStatus::Pending;
            }
        }
    }

    /// True once no task is `Pending` or `InProgress`.
    pub fn is_settled(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    /// Number of tasks currently in `status`.
    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Ids of failed tasks, including blocked dependents.
    pub fn failed_tasks(&self) -> Vec<&TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| &t.id)
            .collect()
    }

    /// The accumulated change-set across all tasks, deduplicated and sorted.
    pub fn files_changed(&self) -> Vec<String> {
        self.tasks
            .iter()
            .flat_map(|t| t.files_changed.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(tasks: &[&Task]) -> Vec<String> {
        tasks.iter().map(|t| t.id.0.clone()).collect()
    }

    fn diamond() -> TaskGraph {
        TaskGraph::from_plan(vec![
            PlannedTask::new("a", "root", &[]),
            PlannedTask::new("b", "left", &["a"]),
            PlannedTask::new("c", "right", &["a"]),
            PlannedTask::new("d", "join", &["b", "c"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_ready_tasks_respect_dependencies() {
        let mut graph = diamond();
        assert_eq!(ids(&graph.ready_tasks()), vec!["a"]);

        graph.start_task(&"a".into()).unwrap();
        assert!(graph.ready_tasks().is_empty());

        graph.complete_task(&"a".into(), vec!["src/lib.rs".into()]).unwrap();
        assert_eq!(ids(&graph.ready_tasks()), vec!["b", "c"]);
    }

    #[test]
    fn test_ready_tasks_break_ties_by_id() {
        let graph = TaskGraph::from_plan(vec![
            PlannedTask::new("z", "z", &[]),
            PlannedTask::new("m", "m", &["z"]),
            PlannedTask::new("b", "b", &[]),
        ])
        .unwrap();
        assert_eq!(ids(&graph.ready_tasks()), vec!["b", "z"]);
    }

    #[test]
    fn test_start_task_rejects_unmet_dependencies() {
        let mut graph = diamond();
        let err = graph.start_task(&"d".into()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn test_fail_task_cascades_to_transitive_dependents() {
        let mut graph = diamond();
        graph.start_task(&"a".into()).unwrap();
        graph.complete_task(&"a".into(), vec![]).unwrap();
        graph.start_task(&"b".into()).unwrap();

        let blocked = graph.fail_task(&"b".into()).unwrap();
        assert_eq!(blocked, vec![TaskId::from("d")]);
        assert_eq!(graph.get(&"d".into()).unwrap().status, TaskStatus::Failed);
        assert_eq!(graph.get(&"c".into()).unwrap().status, TaskStatus::Pending);
        assert_eq!(ids(&graph.ready_tasks()), vec!["c"]);
    }

    #[test]
    fn test_cycle_rejected() {
        let err = TaskGraph::from_plan(vec![
            PlannedTask::new("a", "a", &["c"]),
            PlannedTask::new("b", "b", &["a"]),
            PlannedTask::new("c", "c", &["b"]),
        ])
        .unwrap_err();
        match err {
            DomainError::DependencyCycle(path) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_plans_rejected() {
        assert!(matches!(
            TaskGraph::from_plan(vec![]),
            Err(DomainError::InvalidPlan(_))
        ));
        assert!(matches!(
            TaskGraph::from_plan(vec![
                PlannedTask::new("a", "a", &[]),
                PlannedTask::new("a", "again", &[]),
            ]),
            Err(DomainError::InvalidPlan(_))
        ));
        assert!(matches!(
            TaskGraph::from_plan(vec![PlannedTask::new("a", "a", &["ghost"])]),
            Err(DomainError::InvalidPlan(_))
        ));
        assert!(matches!(
            TaskGraph::from_plan(vec![PlannedTask::new("a", "a", &["a"])]),
            Err(DomainError::DependencyCycle(_))
        ));
    }

    #[test]
    fn test_reopen_keeps_failures_permanent() {
        let mut graph = diamond();
        graph.start_task(&"a".into()).unwrap();
        graph.complete_task(&"a".into(), vec![]).unwrap();
        graph.start_task(&"c".into()).unwrap();
        graph.complete_task(&"c".into(), vec![]).unwrap();
        graph.fail_task(&"b".into()).unwrap();
        assert!(graph.is_settled());

        graph.reopen_completed();
        assert_eq!(graph.count(TaskStatus::Pending), 2);
        assert_eq!(graph.count(TaskStatus::Failed), 2);
        assert!(!graph.is_settled());
    }

    #[test]
    fn test_files_changed_deduplicated() {
        let mut graph = diamond();
        graph.complete_task(&"a".into(), vec!["b.rs".into(), "a.rs".into()]).unwrap();
        graph.complete_task(&"b".into(), vec!["a.rs".into()]).unwrap();
        assert_eq!(graph.files_changed(), vec!["a.rs".to_string(), "b.rs".to_string()]);
    }
}
