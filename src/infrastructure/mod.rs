//! Infrastructure: configuration loading, logging setup and runtime assembly.

pub mod config;
pub mod logging;
pub mod setup;

pub use setup::{build_runtime, build_runtime_with_agent, Runtime};
