//! In-process event bus.
//!
//! Fans out every successfully appended [`WorkflowEvent`] to live
//! subscribers. Delivery is best-effort: a subscriber that falls more than
//! `channel_capacity` events behind is told how many it missed and must
//! backfill from the event log.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::models::WorkflowEvent;

/// Configuration for the EventBus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel capacity for the broadcast channel.
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { channel_capacity: 1024 }
    }
}

/// Central event bus for broadcasting events to multiple consumers.
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
    published: AtomicU64,
}

impl EventBus {
    /// Create a new EventBus with the given configuration.
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            published: AtomicU64::new(0),
        }
    }

    /// Publish an event to whoever is listening right now.
    pub fn publish(&self, event: WorkflowEvent) {
        self.published.fetch_add(1, Ordering::Relaxed);
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    /// Subscribe to every workflow's events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to a single workflow's events.
    pub fn subscribe_to(&self, workflow_id: Uuid) -> WorkflowSubscription {
        WorkflowSubscription {
            workflow_id,
            receiver: self.sender.subscribe(),
        }
    }

    /// Total events published since startup.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

/// A receiver filtered to one workflow id.
pub struct WorkflowSubscription {
    workflow_id: Uuid,
    receiver: broadcast::Receiver<WorkflowEvent>,
}

impl WorkflowSubscription {
    /// The workflow this subscription filters on.
    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }

    /// Next event for this workflow.
    ///
    /// `Lagged` reports events dropped across all workflows, so callers
    /// should treat it as "re-read the log" rather than an exact count.
    pub async fn recv(&mut self) -> Result<WorkflowEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if event.workflow_id == self.workflow_id {
                return Ok(event);
            }
        }
    }
}
