//! Coordinator API over HTTP.
//!
//! REST endpoints for workflow control plus a WebSocket live event stream.
//! Every handler is a thin call into the [`Coordinator`]; domain errors map
//! to `{error, code}` bodies with 400/404/409/429 statuses.

mod workflows;
mod ws;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::models::ServerConfig;
use crate::services::Coordinator;

pub use workflows::{ActionResponse, CreateWorkflowResponse};
pub use ws::{ClientFrame, ServerFrame};

/// Shared state for the API handlers.
pub struct AppState {
    /// Coordinator every handler delegates to.
    pub coordinator: Coordinator,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable message.
    pub error: String,
    /// Stable machine-readable code.
    pub code: String,
    /// Set when a workflow was created but could not be started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
}

/// A [`DomainError`] on its way out of a handler.
#[derive(Debug)]
pub struct ApiError {
    error: DomainError,
    workflow_id: Option<Uuid>,
}

impl ApiError {
    fn with_workflow(mut self, workflow_id: Uuid) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.error {
            DomainError::WorkflowNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            DomainError::Validation(_) | DomainError::InvalidPlan(_) | DomainError::DependencyCycle(_) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_FAILED")
            }
            DomainError::Conflict { .. } | DomainError::SequenceConflict { .. } => {
                (StatusCode::CONFLICT, "CONFLICT")
            }
            DomainError::CapacityExceeded { .. } => (StatusCode::TOO_MANY_REQUESTS, "CAPACITY_EXCEEDED"),
            DomainError::Tracker(_) => (StatusCode::BAD_GATEWAY, "TRACKER_ERROR"),
            DomainError::Agent(_) => (StatusCode::BAD_GATEWAY, "AGENT_ERROR"),
            DomainError::Repository(_) | DomainError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(error: DomainError) -> Self {
        Self {
            error,
            workflow_id: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self.error, code, "request failed");
        }
        let body = ErrorResponse {
            error: self.error.to_string(),
            code: code.to_string(),
            workflow_id: self.workflow_id,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Body of `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `ok` while the server answers.
    pub status: String,
    /// Workflows currently holding a slot.
    pub active_workflows: usize,
    /// Configured ceiling on concurrently driven workflows.
    pub capacity: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        active_workflows: state.coordinator.active_count(),
        capacity: state.coordinator.max_concurrent(),
    })
}

/// Build the API router.
pub fn router(coordinator: Coordinator, enable_cors: bool) -> Router {
    let state = Arc::new(AppState { coordinator });
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/workflows", get(workflows::list).post(workflows::create))
        .route("/workflows/{id}", get(workflows::status))
        .route("/workflows/{id}/start", post(workflows::start))
        .route("/workflows/{id}/approve", post(workflows::approve))
        .route("/workflows/{id}/reject", post(workflows::reject))
        .route("/workflows/{id}/cancel", post(workflows::cancel))
        .route("/workflows/{id}/events", get(workflows::events))
        .route("/ws", get(ws::upgrade))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}

/// The API server.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Build the router around `coordinator`.
    pub fn new(coordinator: Coordinator, config: &ServerConfig) -> Self {
        Self {
            router: router(coordinator, config.enable_cors),
        }
    }

    /// Bind to the configured address.
    pub async fn bind(config: &ServerConfig) -> std::io::Result<TcpListener> {
        let addr = format!("{}:{}", config.host, config.port);
        TcpListener::bind(addr).await
    }

    /// Serve on `listener` until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr: Option<SocketAddr> = listener.local_addr().ok();
        if let Some(addr) = addr {
            tracing::info!(%addr, "HTTP API listening");
        }
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
