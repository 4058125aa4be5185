//! Issue domain model.

use serde::{Deserialize, Serialize};

/// A unit of requested work, fetched once from a tracker and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Tracker-specific identifier (e.g. `octo/repo#42`).
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl Issue {
    /// Build an issue from its parts.
    pub fn new(id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
        }
    }
}
