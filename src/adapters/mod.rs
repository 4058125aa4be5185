//! Adapters for storage, agent back-ends, issue trackers and the HTTP API.

pub mod agents;
pub mod http;
pub mod sqlite;
pub mod trackers;
