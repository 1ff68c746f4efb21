//! Normalized CI events and their persistence lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supported CI providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiProvider {
    /// GitHub Actions
    Github,
    /// GitLab CI
    Gitlab,
    /// CircleCI
    Circleci,
    /// Jenkins
    Jenkins,
    /// Azure DevOps Pipelines
    AzureDevops,
}

impl CiProvider {
    /// Provider name as it appears in idempotency keys and logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Gitlab => "gitlab",
            Self::Circleci => "circleci",
            Self::Jenkins => "jenkins",
            Self::AzureDevops => "azure_devops",
        }
    }
}

/// Coarse failure type inferred at ingestion time from job metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    Build,
    Test,
    Deploy,
    Infrastructure,
    Timeout,
}

/// Processing status of a stored pipeline event.
///
/// Status only ever advances; events are never deleted by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Dispatched,
    Processing,
    Completed,
    Failed,
}

/// Canonical representation of a CI failure notification, produced by the
/// provider-specific normalizers before anything is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedPipelineEvent {
    /// Globally unique key: `provider:repo:pipeline_id:job_id:attempt`
    pub idempotency_key: String,
    /// Originating CI provider
    pub provider: CiProvider,
    /// Provider-side pipeline/run identifier
    pub pipeline_id: String,
    /// Repository in `owner/name` form
    pub repo: String,
    /// Commit SHA the pipeline ran against
    pub commit_sha: String,
    /// Branch name
    pub branch: String,
    /// Stage or job name that failed
    pub stage: String,
    /// Coarse failure classification
    pub failure_type: FailureType,
    /// Short error summary extracted from the payload (failed step names etc.)
    pub error_message: Option<String>,
    /// When the provider says the failure happened
    pub event_timestamp: DateTime<Utc>,
    /// Full provider payload, kept opaque for auditing
    pub raw_payload: serde_json::Value,
    /// Delivery/correlation identifier for tracing
    pub correlation_id: Option<String>,
}

impl NormalizedPipelineEvent {
    /// Derive the idempotency key used by every normalizer.
    #[must_use]
    pub fn idempotency_key_for(
        provider: CiProvider,
        repo: &str,
        pipeline_id: &str,
        job_id: &str,
        attempt: u64,
    ) -> String {
        format!("{}:{repo}:{pipeline_id}:{job_id}:{attempt}", provider.name())
    }
}

/// A stored pipeline event row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Opaque unique identifier
    pub id: Uuid,
    /// Globally unique deduplication key
    pub idempotency_key: String,
    /// Originating CI provider
    pub provider: CiProvider,
    /// Provider-side pipeline identifier
    pub pipeline_id: String,
    /// Repository in `owner/name` form
    pub repo: String,
    /// Commit SHA
    pub commit_sha: String,
    /// Branch name
    pub branch: String,
    /// Failed stage or job name
    pub stage: String,
    /// Coarse failure classification
    pub failure_type: FailureType,
    /// Processing status (monotonically advancing)
    pub status: EventStatus,
    /// Short error summary
    pub error_message: Option<String>,
    /// Full provider payload
    pub raw_payload: serde_json::Value,
    /// Delivery/correlation identifier
    pub correlation_id: Option<String>,
    /// When the provider reported the failure
    pub event_timestamp: DateTime<Utc>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Last row update time
    pub updated_at: DateTime<Utc>,
}

impl PipelineEvent {
    /// Build a fresh row from a normalized event.
    #[must_use]
    pub fn from_normalized(event: NormalizedPipelineEvent) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            idempotency_key: event.idempotency_key,
            provider: event.provider,
            pipeline_id: event.pipeline_id,
            repo: event.repo,
            commit_sha: event.commit_sha,
            branch: event.branch,
            stage: event.stage,
            failure_type: event.failure_type,
            status: EventStatus::Pending,
            error_message: event.error_message,
            raw_payload: event.raw_payload,
            correlation_id: event.correlation_id,
            event_timestamp: event.event_timestamp,
            created_at: now,
            updated_at: now,
        }
    }

    /// Best-effort clone URL derived from the raw payload, falling back to
    /// the canonical GitHub URL for GitHub events.
    #[must_use]
    pub fn repo_url(&self) -> Option<String> {
        let repo_info = self.raw_payload.get("repository")?;
        for key in ["clone_url", "git_url", "http_url", "http_url_to_repo"] {
            if let Some(url) = repo_info.get(key).and_then(|v| v.as_str()) {
                return Some(url.to_string());
            }
        }
        if self.provider == CiProvider::Github {
            return Some(format!("https://github.com/{}.git", self.repo));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_shape() {
        let key = NormalizedPipelineEvent::idempotency_key_for(
            CiProvider::Github,
            "acme/widgets",
            "42",
            "7",
            1,
        );
        assert_eq!(key, "github:acme/widgets:42:7:1");
    }

    #[test]
    fn test_repo_url_from_payload() {
        let normalized = NormalizedPipelineEvent {
            idempotency_key: "github:acme/widgets:1:1:1".into(),
            provider: CiProvider::Github,
            pipeline_id: "1".into(),
            repo: "acme/widgets".into(),
            commit_sha: "abc".into(),
            branch: "main".into(),
            stage: "test".into(),
            failure_type: FailureType::Test,
            error_message: None,
            event_timestamp: Utc::now(),
            raw_payload: serde_json::json!({
                "repository": {"clone_url": "https://github.com/acme/widgets.git"}
            }),
            correlation_id: None,
        };
        let event = PipelineEvent::from_normalized(normalized);
        assert_eq!(
            event.repo_url().as_deref(),
            Some("https://github.com/acme/widgets.git")
        );
    }

    #[test]
    fn test_repo_url_github_fallback() {
        let normalized = NormalizedPipelineEvent {
            idempotency_key: "k".into(),
            provider: CiProvider::Github,
            pipeline_id: "1".into(),
            repo: "acme/widgets".into(),
            commit_sha: "abc".into(),
            branch: "main".into(),
            stage: "test".into(),
            failure_type: FailureType::Build,
            error_message: None,
            event_timestamp: Utc::now(),
            raw_payload: serde_json::json!({"repository": {}}),
            correlation_id: None,
        };
        let event = PipelineEvent::from_normalized(normalized);
        assert_eq!(
            event.repo_url().as_deref(),
            Some("https://github.com/acme/widgets.git")
        );
    }

    #[test]
    fn test_event_status_ordering() {
        assert!(EventStatus::Pending < EventStatus::Dispatched);
        assert!(EventStatus::Dispatched < EventStatus::Completed);
    }
}
