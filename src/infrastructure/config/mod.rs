//! Configuration loading.
//!
//! Defaults are layered under `.maestro/config.yaml`, `.maestro/local.yaml`
//! and `MAESTRO_*` environment variables, then validated.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
