//! Pull-request creation seam.
//!
//! PR creation is an external collaborator; the pipeline only needs this
//! narrow interface and its typed result.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use schemas::{FixSuggestion, RcaResult, ValidationResult};

/// Errors from the PR collaborator.
#[derive(Debug, Error)]
pub enum PrError {
    #[error("pull request creation failed: {0}")]
    Failed(String),
    #[error("pull request provider unavailable: {0}")]
    Unavailable(String),
}

impl PrError {
    /// Whether retrying could help.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Outcome of PR creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrStatus {
    Created,
    Failed,
}

/// Result persisted on the run as `pr_json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrResult {
    /// Outcome
    pub status: PrStatus,
    /// PR URL when created
    pub pr_url: Option<String>,
    /// PR number when created
    pub pr_number: Option<u64>,
    /// Error detail when failed
    pub error_message: Option<String>,
    /// Creation time
    pub created_at: Option<DateTime<Utc>>,
}

impl PrResult {
    /// A successful creation.
    #[must_use]
    pub fn created(url: &str, number: u64) -> Self {
        Self {
            status: PrStatus::Created,
            pr_url: Some(url.to_string()),
            pr_number: Some(number),
            error_message: None,
            created_at: Some(Utc::now()),
        }
    }
}

/// The external PR orchestrator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PrOrchestrator: Send + Sync {
    /// Open a PR carrying `fix`, annotated with the RCA and validation
    /// evidence, against `base_branch` of `repo_url`.
    async fn create_pr_for_fix(
        &self,
        fix: &FixSuggestion,
        rca: &RcaResult,
        validation: &ValidationResult,
        repo_url: &str,
        base_branch: &str,
    ) -> Result<PrResult, PrError>;
}

/// Stand-in used when no PR provider is configured: every run ends in
/// `pr_failed` with an explicit reason instead of silently succeeding.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredPrOrchestrator;

#[async_trait]
impl PrOrchestrator for UnconfiguredPrOrchestrator {
    async fn create_pr_for_fix(
        &self,
        _fix: &FixSuggestion,
        _rca: &RcaResult,
        _validation: &ValidationResult,
        _repo_url: &str,
        _base_branch: &str,
    ) -> Result<PrResult, PrError> {
        Err(PrError::Failed(
            "no pull request provider configured".to_string(),
        ))
    }
}
