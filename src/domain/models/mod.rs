pub mod config;
pub mod event;
pub mod issue;
pub mod review;
pub mod stage;
pub mod task;
pub mod workflow;
pub mod workflow_state;

pub use config::{
    AgentConfig, AgentKind, Config, DatabaseConfig, LoggingConfig, RecoveryPolicy, ServerConfig,
    TrackerConfig, TrackerKind,
};
pub use event::{EventPayload, WorkflowEvent};
pub use issue::Issue;
pub use review::{ReviewResult, ReviewSeverity};
pub use stage::{AgentStageKind, Stage};
pub use task::{PlannedTask, Task, TaskGraph, TaskId, TaskStatus};
pub use workflow::{WorkflowRecord, WorkflowStatus};
pub use workflow_state::{AgentMessage, WorkflowState};
