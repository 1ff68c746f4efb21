//! Failure context assembly.
//!
//! Pulls the job logs and commit metadata through a [`LogSource`], runs the
//! log parser, and assembles the [`FailureContextBundle`] the rest of the
//! pipeline consumes. Log download failures degrade to whatever the
//! webhook payload carried; they never abort the run.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

use intel::LogParser;
use schemas::context::MAX_LOG_BYTES;
use schemas::{ChangedFile, FailureContextBundle, LogContent, PipelineEvent};
use scm::ScmError;

/// Where logs and commit metadata come from.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Download the raw logs of the failed job.
    async fn fetch_logs(&self, event: &PipelineEvent) -> Result<String, ScmError>;

    /// Fetch the changed files and commit message of the failing commit.
    async fn fetch_commit_context(
        &self,
        event: &PipelineEvent,
    ) -> Result<(Vec<ChangedFile>, Option<String>), ScmError>;
}

/// A fixed-text source for offline runs and tests.
pub struct StaticLogSource {
    /// The log text to serve
    pub log_text: String,
    /// Changed files to report
    pub changed_files: Vec<ChangedFile>,
    /// Commit message to report
    pub commit_message: Option<String>,
}

#[async_trait]
impl LogSource for StaticLogSource {
    async fn fetch_logs(&self, _event: &PipelineEvent) -> Result<String, ScmError> {
        Ok(self.log_text.clone())
    }

    async fn fetch_commit_context(
        &self,
        _event: &PipelineEvent,
    ) -> Result<(Vec<ChangedFile>, Option<String>), ScmError> {
        Ok((self.changed_files.clone(), self.commit_message.clone()))
    }
}

/// Assembles failure context bundles.
pub struct ContextBuilder {
    log_source: Arc<dyn LogSource>,
    parser: LogParser,
}

impl ContextBuilder {
    /// Build over a log source.
    #[must_use]
    pub fn new(log_source: Arc<dyn LogSource>) -> Self {
        Self {
            log_source,
            parser: LogParser::new(),
        }
    }

    /// Assemble the context for an event.
    pub async fn build_context(&self, event: &PipelineEvent) -> FailureContextBundle {
        let log_text = match self.log_source.fetch_logs(event).await {
            Ok(text) => text,
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Log download failed; using payload fallback");
                event.error_message.clone().unwrap_or_default()
            }
        };

        let (changed_files, commit_message) =
            match self.log_source.fetch_commit_context(event).await {
                Ok(context) => context,
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "Commit context unavailable");
                    (vec![], None)
                }
            };

        let parsed = self.parser.parse(&log_text);
        let log_content = LogContent::capped(&log_text, MAX_LOG_BYTES, Some(event.stage.clone()));

        FailureContextBundle {
            event_id: event.id,
            repo: event.repo.clone(),
            commit_sha: event.commit_sha.clone(),
            branch: event.branch.clone(),
            pipeline_id: event.pipeline_id.clone(),
            job_name: Some(event.stage.clone()),
            log_content: Some(log_content),
            log_summary: Some(parsed.summary),
            errors: parsed.errors,
            stack_traces: parsed.stack_traces,
            test_failures: parsed.test_failures,
            build_errors: parsed.build_errors,
            changed_files,
            commit_message,
            execution_time_seconds: None,
            step_timings: vec![],
            built_at: Utc::now(),
        }
    }
}
