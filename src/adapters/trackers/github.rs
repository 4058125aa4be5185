//! GitHub Issues tracker.
//!
//! Issue references have the form `owner/repo#number`. Each fetch is a
//! single `GET /repos/{owner}/{repo}/issues/{number}` against the REST API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Issue, TrackerConfig};
use crate::domain::ports::Tracker;

/// A parsed `owner/repo#number` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl FromStr for IssueRef {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::Validation(format!("invalid GitHub issue reference '{s}', expected owner/repo#number"));
        let (path, number) = s.trim().split_once('#').ok_or_else(invalid)?;
        let (owner, repo) = path.split_once('/').ok_or_else(invalid)?;
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return Err(invalid());
        }
        let number = number.parse::<u64>().map_err(|_| invalid())?;
        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            number,
        })
    }
}

impl fmt::Display for IssueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

#[derive(Debug, Deserialize)]
struct GitHubIssue {
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

/// Fetches issues from the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubTracker {
    http: Client,
    api_base: String,
    token: Option<String>,
}

impl GitHubTracker {
    /// Tracker against `api_base`, optionally authenticated.
    pub fn new(api_base: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Build from configuration. A missing token falls back to anonymous
    /// access, which only reaches public repositories.
    pub fn from_config(config: &TrackerConfig) -> Self {
        let token = std::env::var(&config.token_env).ok().filter(|t| !t.is_empty());
        if token.is_none() {
            tracing::warn!(token_env = %config.token_env, "no GitHub token set, using anonymous access");
        }
        Self::new(&config.api_base, token)
    }
}

#[async_trait]
impl Tracker for GitHubTracker {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn fetch_issue(&self, issue_ref: &str) -> DomainResult<Issue> {
        let parsed: IssueRef = issue_ref.parse()?;
        let url = format!(
            "{}/repos/{}/{}/issues/{}",
            self.api_base, parsed.owner, parsed.repo, parsed.number
        );

        let mut request = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", "maestro");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| DomainError::Tracker(format!("GitHub request failed: {e}")))?;

        match resp.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(DomainError::Validation(format!("GitHub issue {parsed} not found")));
            }
            status => {
                let body = resp.text().await.unwrap_or_default();
                return Err(DomainError::Tracker(format!("GitHub returned {status}: {body}")));
            }
        }

        let issue: GitHubIssue = resp
            .json()
            .await
            .map_err(|e| DomainError::Tracker(format!("GitHub issue parse failed: {e}")))?;
        if issue.pull_request.is_some() {
            return Err(DomainError::Validation(format!("{parsed} is a pull request, not an issue")));
        }

        tracing::debug!(issue = %parsed, "fetched GitHub issue");
        Ok(Issue::new(parsed.to_string(), issue.title, issue.body.unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_issue_ref() {
        let parsed: IssueRef = "octo/widgets#42".parse().unwrap();
        assert_eq!(parsed.owner, "octo");
        assert_eq!(parsed.repo, "widgets");
        assert_eq!(parsed.number, 42);
        assert_eq!(parsed.to_string(), "octo/widgets#42");

        for bad in ["octo/widgets", "widgets#4", "octo/widgets#x", "/widgets#1", "a/b/c#1"] {
            assert!(bad.parse::<IssueRef>().is_err(), "{bad} should not parse");
        }
    }

    #[tokio::test]
    async fn test_fetch_issue() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repos/octo/widgets/issues/42")
            .match_header("authorization", "Bearer ghp_test")
            .match_header("user-agent", "maestro")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"number":42,"title":"Add dark mode","body":"Please.","state":"open"}"#)
            .create_async()
            .await;

        let tracker = GitHubTracker::new(server.url(), Some("ghp_test".to_string()));
        let issue = tracker.fetch_issue("octo/widgets#42").await.unwrap();

        assert_eq!(issue, Issue::new("octo/widgets#42", "Add dark mode", "Please."));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_issue_is_validation_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/octo/widgets/issues/7")
            .with_status(404)
            .create_async()
            .await;

        let tracker = GitHubTracker::new(server.url(), None);
        let err = tracker.fetch_issue("octo/widgets#7").await.unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn test_pull_requests_are_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/octo/widgets/issues/8")
            .with_status(200)
            .with_body(r#"{"title":"PR","body":null,"pull_request":{"url":"x"}}"#)
            .create_async()
            .await;

        let tracker = GitHubTracker::new(server.url(), None);
        assert!(tracker.fetch_issue("octo/widgets#8").await.is_err());
    }

    #[test]
    fn test_from_config_reads_token() {
        temp_env::with_var("MAESTRO_TEST_GH_TOKEN", Some("ghp_env"), || {
            let config = TrackerConfig {
                token_env: "MAESTRO_TEST_GH_TOKEN".to_string(),
                ..TrackerConfig::default()
            };
            let tracker = GitHubTracker::from_config(&config);
            assert_eq!(tracker.token.as_deref(), Some("ghp_env"));
            assert_eq!(tracker.api_base, "https://api.github.com");
        });
    }
}
