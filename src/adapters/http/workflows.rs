//! Workflow REST endpoints.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::{ApiError, ApiResult, AppState};
use crate::domain::errors::DomainError;
use crate::domain::models::{WorkflowEvent, WorkflowRecord, WorkflowStatus};
use crate::services::WorkflowView;

#[derive(Debug, Deserialize)]
pub(super) struct CreateWorkflowRequest {
    issue_ref: String,
    #[serde(default)]
    worktree_ref: Option<String>,
    #[serde(default = "default_start")]
    start: bool,
}

const fn default_start() -> bool {
    true
}

/// Body of a successful `POST /workflows`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateWorkflowResponse {
    pub workflow_id: Uuid,
    /// Whether a driver was started for it.
    pub started: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct RejectRequest {
    feedback: String,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct CancelRequest {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ListQuery {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct EventsQuery {
    #[serde(default)]
    since: u64,
}

/// Body of a successful workflow command.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResponse {
    pub workflow_id: Uuid,
    /// Status after the command.
    pub status: WorkflowStatus,
}

async fn action_response(state: &AppState, workflow_id: Uuid) -> ApiResult<Json<ActionResponse>> {
    let record = state.coordinator.log().record(workflow_id).await?;
    Ok(Json(ActionResponse {
        workflow_id,
        status: record.status,
    }))
}

pub(super) async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateWorkflowRequest>,
) -> ApiResult<(StatusCode, Json<CreateWorkflowResponse>)> {
    let workflow_id = state.coordinator.submit(&req.issue_ref, req.worktree_ref).await?;
    if req.start {
        state
            .coordinator
            .start(workflow_id)
            .await
            .map_err(|e| ApiError::from(e).with_workflow(workflow_id))?;
    }
    Ok((
        StatusCode::CREATED,
        Json(CreateWorkflowResponse {
            workflow_id,
            started: req.start,
        }),
    ))
}

pub(super) async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<WorkflowRecord>>> {
    let status = match query.status.as_deref() {
        Some(s) => Some(
            WorkflowStatus::from_str(s)
                .ok_or_else(|| DomainError::Validation(format!("unknown workflow status '{s}'")))?,
        ),
        None => None,
    };
    Ok(Json(state.coordinator.list(status).await?))
}

pub(super) async fn status(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<WorkflowView>> {
    Ok(Json(state.coordinator.status(workflow_id).await?))
}

pub(super) async fn start(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<ActionResponse>> {
    state.coordinator.start(workflow_id).await?;
    action_response(&state, workflow_id).await
}

pub(super) async fn approve(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<ActionResponse>> {
    state.coordinator.approve(workflow_id).await?;
    action_response(&state, workflow_id).await
}

pub(super) async fn reject(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<Uuid>,
    Json(req): Json<RejectRequest>,
) -> ApiResult<Json<ActionResponse>> {
    state.coordinator.reject(workflow_id, &req.feedback).await?;
    action_response(&state, workflow_id).await
}

pub(super) async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<Json<ActionResponse>> {
    // The body is optional; an empty one cancels without a reason.
    let req: CancelRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CancelRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| DomainError::Validation(format!("invalid cancel body: {e}")))?
    };
    state.coordinator.cancel(workflow_id, req.reason).await?;
    action_response(&state, workflow_id).await
}

pub(super) async fn events(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Vec<WorkflowEvent>>> {
    Ok(Json(state.coordinator.events_since(workflow_id, query.since).await?))
}
