//! Port trait definitions (Hexagonal Architecture)
//!
//! Adapters implement these; services depend only on the traits.

pub mod agent;
pub mod event_repository;
pub mod tracker;
pub mod workflow_repository;

pub use agent::{AgentCapability, AgentOutput, AgentStage, TaskOutcome};
pub use event_repository::EventRepository;
pub use tracker::Tracker;
pub use workflow_repository::WorkflowRepository;
