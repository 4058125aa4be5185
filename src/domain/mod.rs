//! Domain layer for the Maestro orchestrator
//!
//! Pure models, the error taxonomy, and the port traits adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{AgentError, DomainError, DomainResult};
