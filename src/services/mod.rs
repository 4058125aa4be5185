//! Orchestration services: the event log, the scheduler, the per-workflow
//! stage machine and the coordinator that drives them.

pub mod coordinator;
pub mod event_bus;
pub mod event_log;
pub mod stage_machine;
pub mod task_scheduler;

pub use coordinator::{Coordinator, CoordinatorConfig, RecoveryReport, WorkflowView, INTERRUPTED};
pub use event_bus::{EventBus, EventBusConfig, WorkflowSubscription};
pub use event_log::EventLog;
pub use stage_machine::{ExecutionSlot, StageMachine, StageSettings};
pub use task_scheduler::{DevelopOutcome, SchedulerConfig, TaskScheduler};
