//! Workflow commands: thin calls into the Coordinator API.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::cli::client::ApiClient;
use crate::cli::display::{list_table, render_list};
use crate::cli::output::{output, truncate, CommandOutput};
use crate::cli::Commands;
use crate::domain::models::{WorkflowEvent, WorkflowRecord, WorkflowStatus};
use crate::services::WorkflowView;

// ── Output structs ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CreatedOutput {
    workflow_id: Uuid,
    issue_ref: String,
    started: bool,
}

impl CommandOutput for CreatedOutput {
    fn to_human(&self) -> String {
        let state = if self.started { "started" } else { "pending" };
        format!("Created workflow {} for {} ({state})", self.workflow_id, self.issue_ref)
    }
}

#[derive(Debug, Serialize)]
struct ActionOutput {
    action: &'static str,
    workflow_id: Uuid,
    status: WorkflowStatus,
}

impl CommandOutput for ActionOutput {
    fn to_human(&self) -> String {
        format!("{} workflow {} (status: {})", self.action, self.workflow_id, self.status)
    }
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    #[serde(flatten)]
    view: WorkflowView,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let record = &self.view.record;
        let state = &self.view.state;
        let mut lines = vec![
            format!("Workflow {}", record.id),
            format!("  Issue:     {}", record.issue_ref),
            format!("  Status:    {}", record.status),
            format!("  Stage:     {}", state.current_stage),
        ];
        if let Some(issue) = &state.issue {
            lines.push(format!("  Title:     {}", issue.title));
        }
        if let Some(worktree) = &record.worktree_ref {
            lines.push(format!("  Worktree:  {worktree}"));
        }
        lines.push(format!("  Created:   {}", format_time(record.created_at)));
        if let Some(completed) = record.completed_at {
            lines.push(format!("  Finished:  {}", format_time(completed)));
        }
        if state.revision_count > 0 {
            lines.push(format!("  Revisions: {}", state.revision_count));
        }
        if let Some(reason) = &state.failure_reason {
            lines.push(format!("  Reason:    {reason}"));
        }
        if let Some(approved) = state.human_approved {
            lines.push(format!("  Approved:  {}", if approved { "yes" } else { "no" }));
        }

        if let Some(plan) = &state.plan {
            let mut table = list_table(&["task", "status", "depends on", "description"]);
            for task in plan.tasks() {
                let deps: Vec<&str> = task.dependencies.iter().map(|d| d.as_str()).collect();
                table.add_row(vec![
                    task.id.to_string(),
                    task.status.as_str().to_string(),
                    deps.join(", "),
                    truncate(&task.description, 60),
                ]);
            }
            lines.push(String::new());
            lines.push(render_list("task", &table, plan.len()));
        }

        for (i, review) in state.review_results.iter().enumerate() {
            let verdict = if review.approved { "approved" } else { "changes requested" };
            lines.push(format!(
                "Review {}: {verdict} ({} comment(s), severity {})",
                i + 1,
                review.comments.len(),
                review.severity.as_str()
            ));
        }

        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
struct ListOutput {
    workflows: Vec<WorkflowRecord>,
}

impl CommandOutput for ListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "issue", "status", "created"]);
        for record in &self.workflows {
            table.add_row(vec![
                record.id.to_string(),
                truncate(&record.issue_ref, 40),
                record.status.to_string(),
                format_time(record.created_at),
            ]);
        }
        render_list("workflow", &table, self.workflows.len())
    }
}

#[derive(Debug, Serialize)]
struct EventsOutput {
    workflow_id: Uuid,
    events: Vec<WorkflowEvent>,
}

impl CommandOutput for EventsOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["seq", "time", "type"]);
        for event in &self.events {
            table.add_row(vec![
                event.sequence.to_string(),
                format_time(event.timestamp),
                event.event_type().to_string(),
            ]);
        }
        render_list("event", &table, self.events.len())
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Run a client subcommand against the server.
pub async fn execute(command: Commands, client: &ApiClient, json_mode: bool) -> Result<()> {
    match command {
        Commands::Serve(_) => anyhow::bail!("serve is not a client command"),

        Commands::Start {
            issue_ref,
            worktree,
            no_start,
        } => {
            let resp = client.create(&issue_ref, worktree.as_deref(), !no_start).await?;
            output(
                &CreatedOutput {
                    workflow_id: resp.workflow_id,
                    issue_ref,
                    started: resp.started,
                },
                json_mode,
            );
        }

        Commands::Approve { id } => {
            let resp = client.approve(id).await?;
            output(&action("Approved", resp.workflow_id, resp.status), json_mode);
        }

        Commands::Reject { id, feedback } => {
            let resp = client.reject(id, &feedback).await?;
            output(&action("Rejected", resp.workflow_id, resp.status), json_mode);
        }

        Commands::Cancel { id, reason } => {
            let resp = client.cancel(id, reason.as_deref()).await?;
            output(&action("Cancelled", resp.workflow_id, resp.status), json_mode);
        }

        Commands::Status { id } => {
            let view = client.status(id).await?;
            output(&StatusOutput { view }, json_mode);
        }

        Commands::List { status } => {
            let workflows = client.list(status.as_deref()).await?;
            output(&ListOutput { workflows }, json_mode);
        }

        Commands::Events { id, since } => {
            let events = client.events(id, since).await?;
            output(
                &EventsOutput {
                    workflow_id: id,
                    events,
                },
                json_mode,
            );
        }
    }
    Ok(())
}

fn action(action: &'static str, workflow_id: Uuid, status: WorkflowStatus) -> ActionOutput {
    ActionOutput {
        action,
        workflow_id,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{PlannedTask, TaskGraph, WorkflowState};

    #[test]
    fn test_status_output_renders_task_table() {
        let record = WorkflowRecord::new("octo/repo#5", Some("feature/x".to_string()));
        let mut state = WorkflowState::new(record.id);
        state.plan = Some(
            TaskGraph::from_plan(vec![
                PlannedTask::new("schema", "Add the schema", &[]),
                PlannedTask::new("api", "Expose the endpoint", &["schema"]),
            ])
            .unwrap(),
        );

        let human = StatusOutput {
            view: WorkflowView { record, state },
        }
        .to_human();

        assert!(human.contains("octo/repo#5"));
        assert!(human.contains("feature/x"));
        assert!(human.contains("2 tasks:"));
        assert!(human.contains("Expose the endpoint"));
    }

    #[test]
    fn test_list_output_empty() {
        let out = ListOutput { workflows: vec![] };
        assert_eq!(out.to_human(), "No workflows found.");
        assert_eq!(out.to_json()["workflows"], serde_json::json!([]));
    }
}
