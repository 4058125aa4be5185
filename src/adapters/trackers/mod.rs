//! Issue tracker adapters.

pub mod github;
pub mod none;

use std::sync::Arc;

use crate::domain::models::{TrackerConfig, TrackerKind};
use crate::domain::ports::Tracker;

pub use github::{GitHubTracker, IssueRef};
pub use none::NoneTracker;

/// Construct the configured tracker.
pub fn build_tracker(config: &TrackerConfig) -> Arc<dyn Tracker> {
    let tracker: Arc<dyn Tracker> = match config.kind {
        TrackerKind::None => Arc::new(NoneTracker),
        TrackerKind::Github => Arc::new(GitHubTracker::from_config(config)),
    };
    tracing::info!(tracker = tracker.name(), "issue tracker configured");
    tracker
}
