//! Review verdict produced by the review agent.

use serde::{Deserialize, Serialize};

/// How serious the reviewer considers the outstanding issues to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReviewSeverity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl ReviewSeverity {
    /// Wire name of the severity.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Outcome of one Review stage entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewResult {
    /// Whether the changes may ship.
    pub approved: bool,
    #[serde(default)]
    pub comments: Vec<String>,
    #[serde(default)]
    pub severity: ReviewSeverity,
}

impl ReviewResult {
    /// A clean approval.
    pub fn approved() -> Self {
        Self {
            approved: true,
            comments: Vec::new(),
            severity: ReviewSeverity::Low,
        }
    }

    /// A rejection carrying one comment.
    pub fn changes_requested(comment: impl Into<String>, severity: ReviewSeverity) -> Self {
        Self {
            approved: false,
            comments: vec![comment.into()],
            severity,
        }
    }
}
