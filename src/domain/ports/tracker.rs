//! Issue tracker port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Issue;

/// Source of issues. Every implementation returns the same normalized shape.
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Tracker name, for logs.
    fn name(&self) -> &'static str;

    /// Fetch one issue by its tracker-specific reference.
    async fn fetch_issue(&self, issue_ref: &str) -> DomainResult<Issue>;
}
