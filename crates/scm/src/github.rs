//! GitHub REST client for workflow jobs, commits, and job logs.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::ScmError;

const DEFAULT_API_BASE: &str = "https://api.github.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Commit metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitInfo {
    /// Commit SHA
    pub sha: String,
    /// Commit payload
    pub commit: CommitDetail,
    /// Changed files, present when fetching a single commit
    #[serde(default)]
    pub files: Vec<CommitFile>,
}

/// Inner commit payload.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitDetail {
    /// Commit message
    pub message: String,
}

/// One file changed by a commit.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitFile {
    /// File path
    pub filename: String,
    /// Change status
    pub status: String,
    /// Lines added
    #[serde(default)]
    pub additions: u32,
    /// Lines deleted
    #[serde(default)]
    pub deletions: u32,
}

/// Workflow job metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowJob {
    /// Job id
    pub id: u64,
    /// Job name
    pub name: String,
    /// Job conclusion
    pub conclusion: Option<String>,
    /// Steps with conclusions
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

/// One step of a workflow job.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowStep {
    /// Step name
    pub name: String,
    /// Step conclusion
    pub conclusion: Option<String>,
}

/// Thin client over the GitHub REST API.
pub struct GithubClient {
    http: reqwest::Client,
    base_url: String,
}

impl GithubClient {
    /// Build a client; `token` enables authenticated requests.
    pub fn new(token: Option<&str>) -> Result<Self, ScmError> {
        Self::with_base_url(DEFAULT_API_BASE, token)
    }

    /// Build a client against a custom API base (tests, GHES).
    pub fn with_base_url(base_url: &str, token: Option<&str>) -> Result<Self, ScmError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("remedy"));
        if let Some(token) = token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, ScmError> {
        let url = format!("{}{path}", self.base_url);
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScmError::ApiStatus {
                status: status.as_u16(),
                context: path.to_string(),
            });
        }
        Ok(response)
    }

    /// Fetch a commit with its changed files.
    pub async fn get_commit(&self, repo: &str, sha: &str) -> Result<CommitInfo, ScmError> {
        let response = self.get(&format!("/repos/{repo}/commits/{sha}")).await?;
        Ok(response.json().await?)
    }

    /// Fetch a workflow job.
    pub async fn get_workflow_job(&self, repo: &str, job_id: u64) -> Result<WorkflowJob, ScmError> {
        let response = self
            .get(&format!("/repos/{repo}/actions/jobs/{job_id}"))
            .await?;
        Ok(response.json().await?)
    }

    /// Download the raw logs of a workflow job.
    pub async fn download_job_logs(&self, repo: &str, job_id: u64) -> Result<String, ScmError> {
        let response = self
            .get(&format!("/repos/{repo}/actions/jobs/{job_id}/logs"))
            .await?;
        let text = response.text().await?;
        debug!(repo, job_id, bytes = text.len(), "Downloaded job logs");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_download_job_logs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/actions/jobs/7/logs"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("ModuleNotFoundError: No module named 'requests'"),
            )
            .mount(&server)
            .await;

        let client = GithubClient::with_base_url(&server.uri(), None).unwrap();
        let logs = client.download_job_logs("acme/widgets", 7).await.unwrap();
        assert!(logs.contains("ModuleNotFoundError"));
    }

    #[tokio::test]
    async fn test_get_commit_parses_files() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/commits/abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sha": "abc123",
                "commit": {"message": "bump deps"},
                "files": [
                    {"filename": "requirements.txt", "status": "modified",
                     "additions": 1, "deletions": 1}
                ]
            })))
            .mount(&server)
            .await;

        let client = GithubClient::with_base_url(&server.uri(), None).unwrap();
        let commit = client.get_commit("acme/widgets", "abc123").await.unwrap();
        assert_eq!(commit.commit.message, "bump deps");
        assert_eq!(commit.files.len(), 1);
        assert_eq!(commit.files[0].filename, "requirements.txt");
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/actions/jobs/7/logs"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = GithubClient::with_base_url(&server.uri(), None).unwrap();
        let err = client.download_job_logs("acme/widgets", 7).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_not_found_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/actions/jobs/9/logs"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = GithubClient::with_base_url(&server.uri(), None).unwrap();
        let err = client.download_job_logs("acme/widgets", 9).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
