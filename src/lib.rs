//! Maestro - multi-agent development workflow orchestrator
//!
//! Drives each workflow through Plan → Approve → Develop ⇄ Review → Done,
//! recording every step as an event in a per-workflow, gapless log. The
//! log is the only source of truth; workflow state is a projection of it.
//!
//! # Architecture
//!
//! - **Domain** (`domain`): models, the event projection and port traits
//! - **Services** (`services`): event log, task scheduler, stage machine and
//!   the execution coordinator
//! - **Adapters** (`adapters`): SQLite storage, agent back-ends, issue
//!   trackers and the HTTP/WebSocket API
//! - **Infrastructure** (`infrastructure`): configuration, logging and
//!   runtime assembly
//! - **CLI** (`cli`): command-line client of the HTTP API

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{AgentError, DomainError, DomainResult};
pub use domain::models::{
    Config, EventPayload, Issue, ReviewResult, Stage, Task, TaskGraph, TaskId, TaskStatus,
    WorkflowEvent, WorkflowRecord, WorkflowState, WorkflowStatus,
};
pub use domain::ports::{AgentCapability, AgentOutput, AgentStage, Tracker};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{Coordinator, CoordinatorConfig, EventBus, EventLog, WorkflowView};
