//! Git workspace operations through the `git` CLI.
//!
//! Clones are shallow (configurable depth, default 50), checked out at the
//! failing commit, and live in disposable temp directories. Every command
//! runs under a deadline and its stderr is captured for typed errors.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{ApplyOutcome, RepoProvider, ScmError};

/// Default shallow-clone depth.
pub const DEFAULT_CLONE_DEPTH: u32 = 50;
/// Deadline for a clone.
const CLONE_TIMEOUT: Duration = Duration::from_secs(120);
/// Deadline for patch checks and application.
const APPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Clones repositories into a scratch directory and applies patches.
pub struct GitWorkspace {
    workdir: PathBuf,
}

impl Default for GitWorkspace {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("remedy-clones"))
    }
}

impl GitWorkspace {
    /// Use `workdir` as the parent for all clones.
    #[must_use]
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }

    async fn run_git(
        &self,
        args: &[&str],
        cwd: Option<&Path>,
        stdin: Option<&str>,
        deadline: Duration,
    ) -> Result<std::process::Output, ScmError> {
        let mut command = Command::new("git");
        command.args(args);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        command
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        if let Some(input) = stdin {
            let mut handle = child.stdin.take().expect("stdin was piped");
            handle.write_all(input.as_bytes()).await?;
            drop(handle);
        }

        match tokio::time::timeout(deadline, child.wait_with_output()).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(ScmError::Timeout(deadline.as_secs())),
        }
    }
}

#[async_trait]
impl RepoProvider for GitWorkspace {
    async fn clone_repo(
        &self,
        repo_url: &str,
        branch: &str,
        commit: &str,
        depth: u32,
    ) -> Result<PathBuf, ScmError> {
        tokio::fs::create_dir_all(&self.workdir).await?;
        let target = tempfile::Builder::new()
            .prefix("clone-")
            .tempdir_in(&self.workdir)?
            .keep();

        let depth_arg = depth.to_string();
        let target_str = target.to_string_lossy().to_string();
        let output = self
            .run_git(
                &[
                    "clone",
                    "--depth",
                    &depth_arg,
                    "--branch",
                    branch,
                    "--single-branch",
                    repo_url,
                    &target_str,
                ],
                None,
                None,
                CLONE_TIMEOUT,
            )
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            self.cleanup(&target);
            return Err(ScmError::CommandFailed {
                command: "git clone".to_string(),
                stderr,
            });
        }

        // Best-effort checkout of the exact failing commit; a shallow clone
        // may not contain it, in which case the branch head stands in.
        let checkout = self
            .run_git(&["checkout", commit], Some(&target), None, APPLY_TIMEOUT)
            .await?;
        if !checkout.status.success() {
            warn!(
                commit,
                stderr = %String::from_utf8_lossy(&checkout.stderr),
                "Commit not reachable in shallow clone; staying on branch head"
            );
        }

        debug!(repo_url, branch, commit, path = %target.display(), "Cloned repository");
        Ok(target)
    }

    async fn apply_patch(
        &self,
        repo_path: &Path,
        diff: &str,
        check_only: bool,
    ) -> Result<ApplyOutcome, ScmError> {
        let mut args = vec!["apply", "--whitespace=nowarn"];
        if check_only {
            args.push("--check");
        }
        args.push("-");

        let output = self
            .run_git(&args, Some(repo_path), Some(diff), APPLY_TIMEOUT)
            .await?;
        if output.status.success() {
            Ok(ApplyOutcome {
                success: true,
                error_message: None,
            })
        } else {
            Ok(ApplyOutcome {
                success: false,
                error_message: Some(String::from_utf8_lossy(&output.stderr).into_owned()),
            })
        }
    }

    fn cleanup(&self, repo_path: &Path) {
        if !repo_path.starts_with(&self.workdir) {
            warn!(path = %repo_path.display(), "Refusing to clean a path outside the workdir");
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(repo_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %repo_path.display(), error = %e, "Failed to clean up clone");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_apply_patch_check_against_local_tree() {
        // `git apply --check` works in any directory with git installed;
        // exercise the success and failure paths against a scratch tree.
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "flask==2.0\n").unwrap();
        let init = std::process::Command::new("git")
            .args(["init", "-q"])
            .current_dir(dir.path())
            .status();
        if !init.map(|s| s.success()).unwrap_or(false) {
            // git not available in this environment; nothing to assert
            return;
        }

        let workspace = GitWorkspace::new(dir.path().to_path_buf());
        let good = "\
--- a/requirements.txt
+++ b/requirements.txt
@@ -1 +1,2 @@
 flask==2.0
+requests==1.0.0
";
        let outcome = workspace
            .apply_patch(dir.path(), good, true)
            .await
            .unwrap();
        assert!(outcome.success, "{:?}", outcome.error_message);

        let bad = "\
--- a/requirements.txt
+++ b/requirements.txt
@@ -1 +1,2 @@
 django==9.9
+requests==1.0.0
";
        let outcome = workspace.apply_patch(dir.path(), bad, true).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.error_message.is_some());
    }

    #[test]
    fn test_cleanup_refuses_foreign_paths() {
        let workspace = GitWorkspace::new(PathBuf::from("/tmp/remedy-test-workdir"));
        // Must not remove anything outside its own workdir
        workspace.cleanup(Path::new("/etc"));
        assert!(Path::new("/etc").exists());
    }
}
