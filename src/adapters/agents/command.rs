//! Agent backed by a local executable.
//!
//! Each call spawns the configured program, writes an [`AgentRequest`] as
//! JSON to its stdin and reads one [`AgentOutput`] JSON document from its
//! stdout. A non-zero exit is a failed call. The child is killed if the
//! call is dropped, which is how the per-call timeout reaches it.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::AgentRequest;
use crate::domain::errors::AgentError;
use crate::domain::models::WorkflowState;
use crate::domain::ports::{AgentCapability, AgentOutput, AgentStage};

/// Characters of stderr kept in a failure message.
const STDERR_TAIL: usize = 2000;

/// Runs an external program per agent call, JSON over stdin and stdout.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    program: String,
    args: Vec<String>,
}

impl CommandAgent {
    /// Agent that spawns `program` with `args`.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn tail(text: &str) -> &str {
        let text = text.trim();
        match text.char_indices().rev().nth(STDERR_TAIL - 1) {
            Some((idx, _)) => &text[idx..],
            None => text,
        }
    }
}

#[async_trait]
impl AgentCapability for CommandAgent {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn generate(&self, stage: &AgentStage, state: &WorkflowState) -> Result<AgentOutput, AgentError> {
        let input = serde_json::to_vec(&AgentRequest { stage, state })
            .map_err(|e| AgentError::Failed(format!("failed to encode agent request: {e}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("MAESTRO_WORKFLOW_ID", state.workflow_id.to_string())
            .env("MAESTRO_STAGE", stage.kind().as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Unavailable(format!("failed to spawn {}: {e}", self.program)))?;

        // Write concurrently with reading so a chatty child cannot block on a full pipe.
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                stdin.write_all(&input).await?;
                stdin.shutdown().await
            })
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| AgentError::Failed(format!("failed to wait for {}: {e}", self.program)))?;

        if let Some(writer) = writer {
            if let Ok(Err(err)) = writer.await {
                tracing::debug!(program = %self.program, error = %err, "agent closed stdin early");
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                Self::tail(&stderr)
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| AgentError::Failed(format!("{} produced invalid output: {e}", self.program)))
    }
}
