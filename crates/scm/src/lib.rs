//! Repository provider seam.
//!
//! - [`git`]: shallow clones, patch dry-runs and application, cleanup,
//!   all driven through the `git` CLI with per-call timeouts
//! - [`github`]: workflow job metadata, commit metadata, and job log
//!   download over the GitHub REST API

pub mod git;
pub mod github;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors surfaced by repository providers.
#[derive(Debug, Error)]
pub enum ScmError {
    /// The underlying command or request exceeded its deadline.
    #[error("operation timed out after {0}s")]
    Timeout(u64),
    /// HTTP transport failure.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// The remote answered with an unexpected status.
    #[error("unexpected status {status} from {context}")]
    ApiStatus { status: u16, context: String },
    /// A subprocess exited non-zero.
    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScmError {
    /// Whether retrying the operation could reasonably succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) => true,
            Self::ApiStatus { status, .. } => *status >= 500 || *status == 429,
            Self::CommandFailed { .. } | Self::Io(_) => false,
        }
    }
}

/// Outcome of a patch dry-run or application.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    /// Whether `git apply` succeeded
    pub success: bool,
    /// Stderr when it did not
    pub error_message: Option<String>,
}

/// Narrow interface the orchestrator and validator clone through.
#[async_trait]
pub trait RepoProvider: Send + Sync {
    /// Shallow-clone `repo_url` at `commit` on `branch` into a fresh
    /// workspace directory; returns the checkout path.
    async fn clone_repo(
        &self,
        repo_url: &str,
        branch: &str,
        commit: &str,
        depth: u32,
    ) -> Result<PathBuf, ScmError>;

    /// Run `git apply` for `diff` inside `repo_path`. With `check_only`
    /// the tree is left untouched.
    async fn apply_patch(
        &self,
        repo_path: &Path,
        diff: &str,
        check_only: bool,
    ) -> Result<ApplyOutcome, ScmError>;

    /// Remove a clone created by [`RepoProvider::clone_repo`].
    fn cleanup(&self, repo_path: &Path);
}

/// List every file under `root` as repo-relative paths, skipping `.git/`.
#[must_use]
pub fn list_repo_files(root: &Path) -> Vec<String> {
    fn walk(dir: &Path, root: &Path, out: &mut Vec<String>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if path.file_name().is_some_and(|n| n == ".git") {
                    continue;
                }
                walk(&path, root, out);
            } else if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}
