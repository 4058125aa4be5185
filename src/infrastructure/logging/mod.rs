//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - pretty or JSON output on stderr
//! - optional rolling JSON log files

pub mod logger;

pub use logger::{init, LoggerGuard};
