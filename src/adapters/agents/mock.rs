//! Mock agent for testing and demos.
//!
//! Plans, per-task outcomes and review verdicts are scripted up front; every
//! call is recorded so tests can assert on dispatch order and concurrency.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::domain::errors::AgentError;
use crate::domain::models::{AgentStageKind, PlannedTask, ReviewResult, TaskId, WorkflowState};
use crate::domain::ports::{AgentCapability, AgentOutput, AgentStage, TaskOutcome};

/// Scripted outcome for one Develop task.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub files_changed: Vec<String>,
    pub summary: String,
    pub fail: bool,
    pub error_message: Option<String>,
    pub delay: Duration,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            files_changed: Vec::new(),
            summary: "Mock task completed successfully.".to_string(),
            fail: false,
            error_message: None,
            delay: Duration::ZERO,
        }
    }
}

impl MockResponse {
    /// Succeed with these changed files.
    pub fn success<I, S>(files_changed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            files_changed: files_changed.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Fail with `error`.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            fail: true,
            error_message: Some(error.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// One recorded call into the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub stage: AgentStageKind,
    pub task_id: Option<TaskId>,
}

/// Scripted in-process agent for tests and demos.
pub struct MockAgent {
    plan: RwLock<Option<Vec<PlannedTask>>>,
    plan_failure: RwLock<Option<String>>,
    default_response: MockResponse,
    task_overrides: RwLock<HashMap<TaskId, MockResponse>>,
    reviews: Mutex<VecDeque<ReviewResult>>,
    review_failure: RwLock<Option<String>>,
    delays: RwLock<HashMap<AgentStageKind, Duration>>,
    parallel: bool,
    calls: Mutex<Vec<MockCall>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockAgent {
    /// Plans one task, completes every task and approves every review.
    pub fn new() -> Self {
        Self {
            plan: RwLock::new(None),
            plan_failure: RwLock::new(None),
            default_response: MockResponse::default(),
            task_overrides: RwLock::new(HashMap::new()),
            reviews: Mutex::new(VecDeque::new()),
            review_failure: RwLock::new(None),
            delays: RwLock::new(HashMap::new()),
            parallel: true,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Use this plan instead of the default single-task plan.
    #[must_use]
    pub fn with_plan(mut self, tasks: Vec<PlannedTask>) -> Self {
        *self.plan.get_mut() = Some(tasks);
        self
    }

    /// Outcome for tasks without an override.
    #[must_use]
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.default_response = response;
        self
    }

    /// Report that tasks cannot run in parallel.
    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    /// Script the outcome of one task.
    pub async fn set_response_for_task(&self, task_id: impl Into<TaskId>, response: MockResponse) {
        self.task_overrides.write().await.insert(task_id.into(), response);
    }

    /// Queue a verdict. Reviews with nothing queued approve.
    pub async fn push_review(&self, result: ReviewResult) {
        self.reviews.lock().await.push_back(result);
    }

    /// Make every plan call fail.
    pub async fn fail_plan(&self, error: impl Into<String>) {
        *self.plan_failure.write().await = Some(error.into());
    }

    /// Make every review call fail.
    pub async fn fail_review(&self, error: impl Into<String>) {
        *self.review_failure.write().await = Some(error.into());
    }

    /// Sleep this long before answering any call for `stage`.
    pub async fn set_delay(&self, stage: AgentStageKind, delay: Duration) {
        self.delays.write().await.insert(stage, delay);
    }

    /// Every call received so far, in order.
    pub async fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().await.clone()
    }

    /// Develop tasks in the order they were handed to the agent.
    pub async fn dispatched_tasks(&self) -> Vec<TaskId> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| c.task_id.clone())
            .collect()
    }

    /// Highest number of calls that were in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn respond(&self, stage: &AgentStage, state: &WorkflowState) -> Result<AgentOutput, AgentError> {
        let delay = self.delays.read().await.get(&stage.kind()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match stage {
            AgentStage::Plan => {
                if let Some(error) = self.plan_failure.read().await.clone() {
                    return Err(AgentError::Failed(error));
                }
                let tasks = self.plan.read().await.clone().unwrap_or_else(|| {
                    let title = state.issue.as_ref().map_or("the issue", |i| i.title.as_str());
                    vec![PlannedTask::new("implement", format!("Implement {title}"), &[])]
                });
                let summary = format!("{} task(s) planned", tasks.len());
                Ok(AgentOutput::Plan { tasks, summary })
            }
            AgentStage::Develop { task } => {
                let response = self
                    .task_overrides
                    .read()
                    .await
                    .get(&task.id)
                    .cloned()
                    .unwrap_or_else(|| self.default_response.clone());
                if !response.delay.is_zero() {
                    tokio::time::sleep(response.delay).await;
                }
                if response.fail {
                    return Err(AgentError::Failed(
                        response.error_message.unwrap_or_else(|| "Mock failure".to_string()),
                    ));
                }
                Ok(AgentOutput::Task(TaskOutcome {
                    files_changed: response.files_changed,
                    summary: response.summary,
                }))
            }
            AgentStage::Review { .. } => {
                if let Some(error) = self.review_failure.read().await.clone() {
                    return Err(AgentError::Failed(error));
                }
                let verdict = self.reviews.lock().await.pop_front();
                Ok(AgentOutput::Review(verdict.unwrap_or_else(ReviewResult::approved)))
            }
        }
    }
}

impl Default for MockAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentCapability for MockAgent {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn supports_parallel(&self) -> bool {
        self.parallel
    }

    async fn generate(&self, stage: &AgentStage, state: &WorkflowState) -> Result<AgentOutput, AgentError> {
        let task_id = match stage {
            AgentStage::Develop { task } => Some(task.id.clone()),
            _ => None,
        };
        self.calls.lock().await.push(MockCall {
            stage: stage.kind(),
            task_id,
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = self.respond(stage, state).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
