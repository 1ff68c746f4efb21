//! Log and commit-context sources backing the context builder.

use async_trait::async_trait;

use pipeline::LogSource;
use schemas::{ChangedFile, CiProvider, PipelineEvent};
use scm::github::GithubClient;
use scm::ScmError;

/// Pulls job logs and commit metadata from the GitHub API. Events from
/// other providers fall back to the payload's error summary.
pub struct GithubLogSource {
    client: GithubClient,
}

impl GithubLogSource {
    /// Build over an authenticated client.
    #[must_use]
    pub fn new(client: GithubClient) -> Self {
        Self { client }
    }

    fn job_id(event: &PipelineEvent) -> Option<u64> {
        event
            .raw_payload
            .get("workflow_job")
            .and_then(|j| j.get("id"))
            .and_then(serde_json::Value::as_u64)
    }
}

#[async_trait]
impl LogSource for GithubLogSource {
    async fn fetch_logs(&self, event: &PipelineEvent) -> Result<String, ScmError> {
        if event.provider != CiProvider::Github {
            return Ok(event.error_message.clone().unwrap_or_default());
        }
        let Some(job_id) = Self::job_id(event) else {
            return Ok(event.error_message.clone().unwrap_or_default());
        };
        self.client.download_job_logs(&event.repo, job_id).await
    }

    async fn fetch_commit_context(
        &self,
        event: &PipelineEvent,
    ) -> Result<(Vec<ChangedFile>, Option<String>), ScmError> {
        if event.provider != CiProvider::Github || event.commit_sha.is_empty() {
            return Ok((vec![], None));
        }
        let commit = self.client.get_commit(&event.repo, &event.commit_sha).await?;
        let changed = commit
            .files
            .into_iter()
            .map(|f| ChangedFile {
                filename: f.filename,
                status: f.status,
                additions: f.additions,
                deletions: f.deletions,
            })
            .collect();
        Ok((changed, Some(commit.commit.message)))
    }
}
