//! Workflow stages.

use serde::{Deserialize, Serialize};

/// One node of the per-workflow state machine.
///
/// ```text
/// Plan → Approve → Develop ⇄ Review → Done
///   ↘        ↘         ↘        ↘
///                 Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Plan,
    Approve,
    Develop,
    Review,
    Done,
    Failed,
}

impl Stage {
    /// Wire name of the stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Approve => "approve",
            Self::Develop => "develop",
            Self::Review => "review",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Terminal stages accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The stages that call out to an Agent Capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStageKind {
    Plan,
    Develop,
    Review,
}

impl AgentStageKind {
    /// Wire name of the agent stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Develop => "develop",
            Self::Review => "review",
        }
    }
}

impl std::fmt::Display for AgentStageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<AgentStageKind> for Stage {
    fn from(kind: AgentStageKind) -> Self {
        match kind {
            AgentStageKind::Plan => Self::Plan,
            AgentStageKind::Develop => Self::Develop,
            AgentStageKind::Review => Self::Review,
        }
    }
}
