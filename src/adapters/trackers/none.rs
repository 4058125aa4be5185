//! Tracker for running without one: the reference itself is the issue.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Issue;
use crate::domain::ports::Tracker;

/// Tracker that makes up an issue from the reference alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneTracker;

#[async_trait]
impl Tracker for NoneTracker {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn fetch_issue(&self, issue_ref: &str) -> DomainResult<Issue> {
        Ok(Issue::new(issue_ref, issue_ref, ""))
    }
}
