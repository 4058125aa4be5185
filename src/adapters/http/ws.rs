//! WebSocket live event stream.
//!
//! One bus receiver per connection, filtered through a per-connection
//! subscription table. Subscribing with `since` replays the stored log
//! first; the cursor kept per workflow drops any live event the replay
//! already delivered.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use super::AppState;
use crate::domain::errors::DomainResult;
use crate::domain::models::WorkflowEvent;

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe {
        workflow_id: Uuid,
        #[serde(default)]
        since: Option<u64>,
    },
    Unsubscribe {
        workflow_id: Uuid,
    },
}

/// Frames pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Subscribed { workflow_id: Uuid, last_sequence: u64 },
    Unsubscribed { workflow_id: Uuid },
    Event { event: WorkflowEvent },
    Lagged { missed: u64 },
    Error { message: String },
}

/// Last sequence delivered, per subscribed workflow.
#[derive(Debug, Default)]
struct Subscriptions {
    cursors: HashMap<Uuid, u64>,
}

impl Subscriptions {
    fn subscribe(&mut self, workflow_id: Uuid, cursor: u64) {
        self.cursors.insert(workflow_id, cursor);
    }

    fn unsubscribe(&mut self, workflow_id: Uuid) -> bool {
        self.cursors.remove(&workflow_id).is_some()
    }

    /// Whether `event` should go out on this connection. Advances the cursor.
    fn admit(&mut self, event: &WorkflowEvent) -> bool {
        match self.cursors.get_mut(&event.workflow_id) {
            Some(cursor) if event.sequence > *cursor => {
                *cursor = event.sequence;
                true
            }
            _ => false,
        }
    }
}

pub(super) async fn upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| session(socket, state))
}

async fn session(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    // Subscribe before any replay so nothing falls between the two.
    let mut bus = state.coordinator.log().bus().subscribe();
    let mut subscriptions = Subscriptions::default();
    tracing::debug!("websocket session opened");

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "websocket receive failed");
                        break;
                    }
                };
                for frame in handle_client_frame(&state, &mut subscriptions, text.as_str()).await {
                    if send(&mut sink, &frame).await.is_err() {
                        return;
                    }
                }
            }
            received = bus.recv() => {
                let frame = match received {
                    Ok(event) if subscriptions.admit(&event) => ServerFrame::Event { event },
                    Ok(_) => continue,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "websocket subscriber lagged");
                        ServerFrame::Lagged { missed }
                    }
                    Err(RecvError::Closed) => break,
                };
                if send(&mut sink, &frame).await.is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("websocket session closed");
}

async fn send(sink: &mut SplitSink<WebSocket, Message>, frame: &ServerFrame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).map_err(axum::Error::new)?;
    sink.send(Message::Text(text.into())).await
}

async fn handle_client_frame(state: &AppState, subscriptions: &mut Subscriptions, text: &str) -> Vec<ServerFrame> {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(err) => {
            return vec![ServerFrame::Error {
                message: format!("invalid frame: {err}"),
            }]
        }
    };

    match frame {
        ClientFrame::Subscribe { workflow_id, since } => {
            match subscribe(state, subscriptions, workflow_id, since).await {
                Ok(frames) => frames,
                Err(err) => vec![ServerFrame::Error {
                    message: err.to_string(),
                }],
            }
        }
        ClientFrame::Unsubscribe { workflow_id } => {
            subscriptions.unsubscribe(workflow_id);
            vec![ServerFrame::Unsubscribed { workflow_id }]
        }
    }
}

async fn subscribe(
    state: &AppState,
    subscriptions: &mut Subscriptions,
    workflow_id: Uuid,
    since: Option<u64>,
) -> DomainResult<Vec<ServerFrame>> {
    let (cursor, backlog) = match since {
        Some(since) => {
            let backlog = state.coordinator.events_since(workflow_id, since).await?;
            (backlog.last().map_or(since, |e| e.sequence), backlog)
        }
        None => {
            let current = state.coordinator.log().state(workflow_id).await?;
            (current.last_sequence, Vec::new())
        }
    };
    subscriptions.subscribe(workflow_id, cursor);

    let mut frames = Vec::with_capacity(backlog.len() + 1);
    frames.push(ServerFrame::Subscribed {
        workflow_id,
        last_sequence: cursor,
    });
    frames.extend(backlog.into_iter().map(|event| ServerFrame::Event { event }));
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::agents::MockAgent;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteEventRepository, SqliteWorkflowRepository};
    use crate::adapters::trackers::NoneTracker;
    use crate::domain::models::EventPayload;
    use crate::services::{Coordinator, CoordinatorConfig, EventBus, EventLog};

    async fn app_state() -> AppState {
        let pool = create_migrated_test_pool().await.unwrap();
        let log = Arc::new(EventLog::new(
            Arc::new(SqliteEventRepository::new(pool.clone())),
            Arc::new(SqliteWorkflowRepository::new(pool)),
            Arc::new(EventBus::default()),
        ));
        AppState {
            coordinator: Coordinator::new(
                log,
                Arc::new(MockAgent::new()),
                Arc::new(NoneTracker),
                CoordinatorConfig::default(),
            ),
        }
    }

    #[test]
    fn test_admit_deduplicates_by_sequence() {
        let id = Uuid::new_v4();
        let mut subs = Subscriptions::default();
        let event = |seq| WorkflowEvent::new(id, seq, EventPayload::WorkflowStarted);

        assert!(!subs.admit(&event(1)), "not subscribed yet");
        subs.subscribe(id, 2);
        assert!(!subs.admit(&event(2)));
        assert!(subs.admit(&event(3)));
        assert!(!subs.admit(&event(3)));
        assert!(subs.unsubscribe(id));
        assert!(!subs.admit(&event(4)));
    }

    #[test]
    fn test_client_frame_wire_format() {
        let id = Uuid::new_v4();
        let frame: ClientFrame =
            serde_json::from_str(&format!(r#"{{"type":"subscribe","workflow_id":"{id}"}}"#)).unwrap();
        assert_eq!(frame, ClientFrame::Subscribe { workflow_id: id, since: None });

        let json = serde_json::to_value(ServerFrame::Lagged { missed: 4 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "lagged", "missed": 4}));
    }

    #[tokio::test]
    async fn test_subscribe_with_since_replays_backlog() {
        let state = app_state().await;
        let id = state.coordinator.submit("octo/repo#1", None).await.unwrap();
        state
            .coordinator
            .log()
            .append(id, EventPayload::WorkflowCancelled { reason: None })
            .await
            .unwrap();

        let mut subs = Subscriptions::default();
        let text = format!(r#"{{"type":"subscribe","workflow_id":"{id}","since":0}}"#);
        let frames = handle_client_frame(&state, &mut subs, &text).await;

        assert_eq!(
            frames[0],
            ServerFrame::Subscribed {
                workflow_id: id,
                last_sequence: 2
            }
        );
        let sequences: Vec<u64> = frames[1..]
            .iter()
            .map(|f| match f {
                ServerFrame::Event { event } => event.sequence,
                other => panic!("unexpected frame {other:?}"),
            })
            .collect();
        assert_eq!(sequences, vec![1, 2]);

        // A live copy of an already replayed event is dropped.
        let replayed = state.coordinator.events_since(id, 1).await.unwrap().remove(0);
        assert!(!subs.admit(&replayed));
    }

    #[tokio::test]
    async fn test_subscribe_unknown_workflow_is_error_frame() {
        let state = app_state().await;
        let mut subs = Subscriptions::default();
        let text = format!(r#"{{"type":"subscribe","workflow_id":"{}"}}"#, Uuid::new_v4());
        let frames = handle_client_frame(&state, &mut subs, &text).await;
        assert!(matches!(frames.as_slice(), [ServerFrame::Error { .. }]));

        let frames = handle_client_frame(&state, &mut subs, "not json").await;
        assert!(matches!(frames.as_slice(), [ServerFrame::Error { .. }]));
    }
}
