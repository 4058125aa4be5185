//! Command-line interface.
//!
//! `serve` runs the coordinator and its HTTP API in-process; every other
//! command is a thin client of that API.

pub mod client;
pub mod commands;
pub mod display;
pub mod output;

use clap::{Parser, Subcommand};
use uuid::Uuid;

pub use client::{ApiClient, ApiFailure};
pub use output::{output, CommandOutput};

/// Where client commands look for a server by default.
pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8420";

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "maestro", version, about = "Multi-agent development workflow orchestrator")]
pub struct Cli {
    /// Emit JSON instead of human-readable output
    #[arg(long, global = true)]
    pub json: bool,

    /// Base URL of a running maestro server
    #[arg(long, global = true, env = "MAESTRO_SERVER", default_value = DEFAULT_SERVER)]
    pub server: String,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the coordinator and HTTP API until interrupted
    Serve(commands::serve::ServeArgs),

    /// Create a workflow for an issue and (by default) start it
    Start {
        /// Tracker reference, e.g. owner/repo#42
        issue_ref: String,
        /// Worktree or branch the agents should work in
        #[arg(long)]
        worktree: Option<String>,
        /// Create the workflow without starting it
        #[arg(long)]
        no_start: bool,
    },

    /// Approve a workflow's plan
    Approve { id: Uuid },

    /// Reject a workflow's plan with feedback
    Reject { id: Uuid, feedback: String },

    /// Cancel a workflow
    Cancel {
        id: Uuid,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Show a workflow's record and projected state
    Status { id: Uuid },

    /// List workflows
    List {
        /// Filter by status (pending, in_progress, blocked, completed, failed, cancelled)
        #[arg(long)]
        status: Option<String>,
    },

    /// Show a workflow's event log
    Events {
        id: Uuid,
        /// Only events after this sequence number
        #[arg(long, default_value_t = 0)]
        since: u64,
    },
}

/// Print an error and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let mut body = serde_json::json!({ "error": format!("{err:#}") });
        if let Some(failure) = err.downcast_ref::<ApiFailure>() {
            body["code"] = serde_json::Value::String(failure.code.clone());
            if let Some(id) = failure.workflow_id {
                body["workflow_id"] = serde_json::Value::String(id.to_string());
            }
        }
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
