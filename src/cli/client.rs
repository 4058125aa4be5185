//! HTTP client for the Coordinator API.

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::adapters::http::{ActionResponse, CreateWorkflowResponse, ErrorResponse, HealthResponse};
use crate::domain::models::{WorkflowEvent, WorkflowRecord};
use crate::services::WorkflowView;

/// A non-success response from the server.
#[derive(Debug, Error)]
#[error("{message} ({code}, HTTP {status})")]
pub struct ApiFailure {
    /// HTTP status code.
    pub status: u16,
    /// Machine-readable error code, e.g. `CAPACITY_EXCEEDED`.
    pub code: String,
    pub message: String,
    /// Set when the request created a workflow before failing.
    pub workflow_id: Option<Uuid>,
}

/// Typed client for the workflow REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    /// Client for the server at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let resp = request
            .send()
            .await
            .with_context(|| format!("Failed to reach maestro server at {}", self.base_url))?;

        let status = resp.status();
        if status.is_success() {
            return resp.json::<T>().await.context("Failed to decode server response");
        }

        let text = resp.text().await.unwrap_or_default();
        let failure = match serde_json::from_str::<ErrorResponse>(&text) {
            Ok(body) => ApiFailure {
                status: status.as_u16(),
                code: body.code,
                message: body.error,
                workflow_id: body.workflow_id,
            },
            Err(_) => ApiFailure {
                status: status.as_u16(),
                code: "HTTP_ERROR".to_string(),
                message: text,
                workflow_id: None,
            },
        };
        Err(failure.into())
    }

    /// `GET /health`.
    pub async fn health(&self) -> Result<HealthResponse> {
        self.send(self.http.get(self.url("/health"))).await
    }

    /// `POST /workflows`.
    pub async fn create(
        &self,
        issue_ref: &str,
        worktree_ref: Option<&str>,
        start: bool,
    ) -> Result<CreateWorkflowResponse> {
        let body = json!({
            "issue_ref": issue_ref,
            "worktree_ref": worktree_ref,
            "start": start,
        });
        self.send(self.http.post(self.url("/workflows")).json(&body)).await
    }

    /// `POST /workflows/{id}/start`.
    pub async fn start(&self, id: Uuid) -> Result<ActionResponse> {
        self.send(self.http.post(self.url(&format!("/workflows/{id}/start")))).await
    }

    /// `POST /workflows/{id}/approve`.
    pub async fn approve(&self, id: Uuid) -> Result<ActionResponse> {
        self.send(self.http.post(self.url(&format!("/workflows/{id}/approve")))).await
    }

    /// `POST /workflows/{id}/reject`.
    pub async fn reject(&self, id: Uuid, feedback: &str) -> Result<ActionResponse> {
        let body = json!({ "feedback": feedback });
        self.send(self.http.post(self.url(&format!("/workflows/{id}/reject"))).json(&body))
            .await
    }

    /// `POST /workflows/{id}/cancel`.
    pub async fn cancel(&self, id: Uuid, reason: Option<&str>) -> Result<ActionResponse> {
        let body = json!({ "reason": reason });
        self.send(self.http.post(self.url(&format!("/workflows/{id}/cancel"))).json(&body))
            .await
    }

    /// `GET /workflows/{id}`.
    pub async fn status(&self, id: Uuid) -> Result<WorkflowView> {
        self.send(self.http.get(self.url(&format!("/workflows/{id}")))).await
    }

    /// `GET /workflows`, optionally filtered by status.
    pub async fn list(&self, status: Option<&str>) -> Result<Vec<WorkflowRecord>> {
        let mut request = self.http.get(self.url("/workflows"));
        if let Some(status) = status {
            request = request.query(&[("status", status)]);
        }
        self.send(request).await
    }

    /// `GET /workflows/{id}/events?since=`.
    pub async fn events(&self, id: Uuid, since: u64) -> Result<Vec<WorkflowEvent>> {
        let request = self
            .http
            .get(self.url(&format!("/workflows/{id}/events")))
            .query(&[("since", since)]);
        self.send(request).await
    }
}
