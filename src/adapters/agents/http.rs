//! Agent backed by a remote HTTP service.
//!
//! `POST {endpoint}/generate` with an [`AgentRequest`] body; the response
//! body is an [`AgentOutput`]. Transport errors, 429 and 5xx responses are
//! retried with exponential backoff up to `max_retries` times. Other
//! non-success responses fail immediately.

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use super::AgentRequest;
use crate::domain::errors::{AgentError, DomainError, DomainResult};
use crate::domain::models::{AgentConfig, WorkflowState};
use crate::domain::ports::{AgentCapability, AgentOutput, AgentStage};

const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(10);

/// Agent reached over HTTP, retried with exponential backoff.
#[derive(Debug, Clone)]
pub struct HttpAgent {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
    max_retries: u32,
    initial_interval: Duration,
}

impl HttpAgent {
    /// Agent posting to `endpoint`, optionally with a bearer token.
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, max_retries: u32) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            max_retries,
            initial_interval: DEFAULT_INITIAL_INTERVAL,
        }
    }

    /// Build from configuration, reading the bearer token from the
    /// environment variable named by `api_key_env`.
    pub fn from_config(config: &AgentConfig) -> DomainResult<Self> {
        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            DomainError::Validation("agent.endpoint is required for the http agent".to_string())
        })?;
        let api_key = match config.api_key_env.as_deref() {
            Some(var) => {
                let key = std::env::var(var).map_err(|_| {
                    DomainError::Validation(format!("{var} environment variable is not set"))
                })?;
                Some(key)
            }
            None => None,
        };
        Ok(Self::new(endpoint, api_key, config.max_retries))
    }

    /// First retry delay; later delays grow exponentially.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    fn url(&self) -> String {
        format!("{}/generate", self.endpoint)
    }

    async fn attempt(&self, body: &AgentRequest<'_>) -> Result<AgentOutput, backoff::Error<AgentError>> {
        let mut request = self.http.post(self.url()).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await.map_err(|e| {
            backoff::Error::transient(AgentError::Unavailable(format!("agent request failed: {e}")))
        })?;

        let status = resp.status();
        if status.is_success() {
            return resp.json::<AgentOutput>().await.map_err(|e| {
                backoff::Error::permanent(AgentError::Failed(format!("invalid agent response: {e}")))
            });
        }

        let text = resp.text().await.unwrap_or_default();
        let err = AgentError::Failed(format!("agent returned {status}: {text}"));
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(backoff::Error::transient(err))
        } else {
            Err(backoff::Error::permanent(err))
        }
    }
}

#[async_trait]
impl AgentCapability for HttpAgent {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn generate(&self, stage: &AgentStage, state: &WorkflowState) -> Result<AgentOutput, AgentError> {
        let body = AgentRequest { stage, state };
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(DEFAULT_MAX_INTERVAL)
            .with_max_elapsed_time(None)
            .build();

        let mut attempts = 0u32;
        backoff::future::retry_notify(
            policy,
            || {
                attempts += 1;
                let last = attempts > self.max_retries;
                let body = &body;
                async move {
                    match self.attempt(body).await {
                        Err(backoff::Error::Transient { err, .. }) if last => Err(backoff::Error::permanent(err)),
                        other => other,
                    }
                }
            },
            |err: AgentError, delay: Duration| {
                tracing::warn!(
                    workflow_id = %state.workflow_id,
                    stage = %stage.kind(),
                    error = %err,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "agent call failed, retrying"
                );
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ReviewResult;
    use uuid::Uuid;

    fn agent(server: &mockito::Server, retries: u32) -> HttpAgent {
        HttpAgent::new(server.url(), Some("secret".to_string()), retries)
            .with_retry_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_posts_request_with_bearer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/generate")
            .match_header("authorization", "Bearer secret")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"stage":{"stage":"review","files_changed":["a.rs"]}}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"kind":"review","approved":true}"#)
            .create_async()
            .await;

        let state = WorkflowState::new(Uuid::new_v4());
        let output = agent(&server, 0)
            .generate(
                &AgentStage::Review {
                    files_changed: vec!["a.rs".to_string()],
                },
                &state,
            )
            .await
            .unwrap();

        assert_eq!(output, AgentOutput::Review(ReviewResult::approved()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("POST", "/generate")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let state = WorkflowState::new(Uuid::new_v4());
        let err = agent(&server, 2)
            .generate(&AgentStage::Plan, &state)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Failed(msg) if msg.contains("503")));
        failing.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/generate")
            .with_status(400)
            .with_body("bad stage")
            .expect(1)
            .create_async()
            .await;

        let state = WorkflowState::new(Uuid::new_v4());
        let err = agent(&server, 3)
            .generate(&AgentStage::Plan, &state)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Failed(msg) if msg.contains("bad stage")));
        mock.assert_async().await;
    }

    #[test]
    fn test_from_config_reads_api_key_env() {
        temp_env::with_var("MAESTRO_TEST_AGENT_KEY", Some("k-123"), || {
            let config = AgentConfig {
                kind: crate::domain::models::AgentKind::Http,
                endpoint: Some("http://localhost:9000/".to_string()),
                api_key_env: Some("MAESTRO_TEST_AGENT_KEY".to_string()),
                ..AgentConfig::default()
            };
            let agent = HttpAgent::from_config(&config).unwrap();
            assert_eq!(agent.api_key.as_deref(), Some("k-123"));
            assert_eq!(agent.url(), "http://localhost:9000/generate");
        });
    }
}
