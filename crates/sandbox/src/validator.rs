//! The validation orchestrator.
//!
//! Drives the full sandbox sequence for one patch: clone, apply, detect
//! framework, create a locked-down container, install, run tests, scan,
//! clean up. Failures in the setup phases map to an `error` result;
//! transport failures while installing or running tests surface as typed
//! transient errors so the governor can reschedule the run.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use schemas::{ValidationRequest, ValidationResult, ValidationStatus, ValidationStep};
use scm::RepoProvider;

use crate::runtime::{ContainerRuntime, ContainerSpec, RuntimeError};
use crate::scans;
use crate::test_runner::{detect_framework, framework_image, framework_steps, parse_test_counts};

/// Clone depth used for validation checkouts.
const VALIDATION_CLONE_DEPTH: u32 = 50;

/// Errors that abort validation in a retryable way.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The container runtime failed mid-run (daemon hiccup, socket error).
    #[error("sandbox runtime failure during {phase}: {source}")]
    Runtime {
        phase: &'static str,
        #[source]
        source: RuntimeError,
    },
}

impl SandboxError {
    /// Whether the governor should reschedule the run.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Runtime { source, .. } => source.is_transient(),
        }
    }
}

/// Orchestrates the full validation of a fix.
pub struct ValidationOrchestrator {
    repo_provider: Arc<dyn RepoProvider>,
    runtime: Arc<dyn ContainerRuntime>,
    run_scans: bool,
}

impl ValidationOrchestrator {
    /// Build an orchestrator over the given provider and runtime.
    #[must_use]
    pub fn new(repo_provider: Arc<dyn RepoProvider>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            repo_provider,
            runtime,
            run_scans: true,
        }
    }

    /// Disable the scan phase (offline runs, hermetic tests).
    #[must_use]
    pub fn without_scans(mut self) -> Self {
        self.run_scans = false;
        self
    }

    /// Validate a fix end to end.
    pub async fn validate(
        &self,
        request: &ValidationRequest,
    ) -> Result<ValidationResult, SandboxError> {
        let validation_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut result =
            ValidationResult::pending(&request.fix_id, request.event_id, &validation_id);
        let mut steps: Vec<String> = Vec::new();

        info!(
            validation_id = %validation_id,
            fix_id = %request.fix_id,
            repo = %request.repo_url,
            "Starting validation"
        );

        // Phase 1: clone
        result.status = ValidationStatus::Cloning;
        let repo_path = match self
            .repo_provider
            .clone_repo(
                &request.repo_url,
                &request.branch,
                &request.commit_sha,
                VALIDATION_CLONE_DEPTH,
            )
            .await
        {
            Ok(path) => path,
            Err(e) => {
                result.status = ValidationStatus::Error;
                result.error_message = Some(format!("Clone failed: {e}"));
                result.steps_completed = steps;
                result.execution_time_seconds = Some(started.elapsed().as_secs_f64());
                result.completed_at = Some(chrono::Utc::now());
                return Ok(result);
            }
        };
        steps.push("clone".to_string());

        let outcome = self
            .validate_in_clone(request, &repo_path, &mut result, &mut steps)
            .await;

        self.repo_provider.cleanup(&repo_path);
        steps.push("cleanup".to_string());
        result.steps_completed = steps;
        result.execution_time_seconds = Some(started.elapsed().as_secs_f64());
        result.completed_at = Some(chrono::Utc::now());

        info!(
            validation_id = %validation_id,
            status = ?result.status,
            tests_passed = result.tests_passed,
            tests_failed = result.tests_failed,
            "Validation complete"
        );

        outcome.map(|()| result)
    }

    async fn validate_in_clone(
        &self,
        request: &ValidationRequest,
        repo_path: &Path,
        result: &mut ValidationResult,
        steps: &mut Vec<String>,
    ) -> Result<(), SandboxError> {
        // Phase 2: patch (dry run, then apply)
        result.status = ValidationStatus::Patching;
        let check = self
            .repo_provider
            .apply_patch(repo_path, &request.diff, true)
            .await;
        let applied = match check {
            Ok(outcome) if outcome.success => {
                self.repo_provider
                    .apply_patch(repo_path, &request.diff, false)
                    .await
            }
            other => other,
        };
        match applied {
            Ok(outcome) if outcome.success => steps.push("patch".to_string()),
            Ok(outcome) => {
                result.status = ValidationStatus::Error;
                result.error_message = Some(format!(
                    "Patch failed: {}",
                    outcome.error_message.unwrap_or_default()
                ));
                return Ok(());
            }
            Err(e) => {
                result.status = ValidationStatus::Error;
                result.error_message = Some(format!("Patch failed: {e}"));
                return Ok(());
            }
        }

        // Phase 3: framework detection
        let framework = detect_framework(repo_path);
        result.framework_detected = framework.map(String::from);
        steps.push("detect_framework".to_string());

        let validation_steps: Vec<ValidationStep> = request
            .validation_steps
            .clone()
            .unwrap_or_else(|| framework.map(framework_steps).unwrap_or_default());
        if validation_steps.is_empty() {
            // Nothing to run in-container; the applied patch is the result
            result.status = ValidationStatus::Passed;
            return Ok(());
        }

        // Phase 4: container
        let image = framework.map_or("ubuntu:22.04", framework_image);
        let spec = ContainerSpec::workspace(image, repo_path.to_path_buf(), request.allow_network);
        let handle = match self.runtime.create(&spec).await {
            Ok(handle) => handle,
            Err(e) => {
                result.status = ValidationStatus::Error;
                result.error_message = Some(format!("Container creation failed: {e}"));
                return Ok(());
            }
        };
        steps.push("create_sandbox".to_string());

        // Phases 5-6: install + run. Transport failures here are transient.
        let mut logs = String::new();
        let mut run_error: Option<SandboxError> = None;
        for step in &validation_steps {
            result.status = if step.name == "install" {
                ValidationStatus::Installing
            } else {
                ValidationStatus::Running
            };

            let exec = self
                .runtime
                .exec(
                    &handle,
                    &step.command,
                    Duration::from_secs(step.timeout_seconds),
                )
                .await;
            let exec = match exec {
                Ok(exec) => exec,
                Err(e) => {
                    run_error = Some(SandboxError::Runtime {
                        phase: if step.name == "install" {
                            "installing"
                        } else {
                            "running"
                        },
                        source: e,
                    });
                    break;
                }
            };

            logs.push_str(&exec.stdout);
            logs.push('\n');
            logs.push_str(&exec.stderr);
            steps.push(step.name.clone());

            if exec.timed_out {
                result.status = ValidationStatus::Timeout;
                result.error_message = Some(format!("{} timed out", step.name));
                break;
            }
            if step.name == "install" && !exec.success() {
                result.status = ValidationStatus::Failed;
                result.error_message = Some("Install step failed".to_string());
                break;
            }
            if step.name != "install" {
                if let Some(framework) = framework {
                    let counts = parse_test_counts(framework, &logs);
                    result.tests_passed = counts.passed;
                    result.tests_failed = counts.failed;
                    result.tests_skipped = counts.skipped;
                    result.tests_total = counts.total();
                }
                result.status = if exec.success() {
                    ValidationStatus::Passed
                } else {
                    ValidationStatus::Failed
                };
            }
        }
        result.logs = logs;

        self.runtime.cleanup(&handle).await;
        if let Some(e) = run_error {
            warn!(error = %e, "Sandbox runtime failure; surfacing as retryable");
            return Err(e);
        }

        // Phase 7: scans on the patched tree
        if self.run_scans && result.status.is_terminal() {
            result.scans = Some(scans::run_all(repo_path).await);
            steps.push("scans".to_string());
            if result.status == ValidationStatus::Passed
                && result
                    .scans
                    .as_ref()
                    .is_some_and(schemas::ScanSummary::has_blocking_finding)
            {
                result.status = ValidationStatus::Failed;
                result.error_message = Some("Security scan reported blocking findings".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ExecResult, MockRuntime, ScriptedExec};
    use async_trait::async_trait;
    use scm::{ApplyOutcome, ScmError};
    use std::path::PathBuf;

    /// Copies a fixture directory instead of cloning over the network.
    struct FixtureProvider {
        fixture: PathBuf,
        fail_patch: bool,
    }

    #[async_trait]
    impl RepoProvider for FixtureProvider {
        async fn clone_repo(
            &self,
            _repo_url: &str,
            _branch: &str,
            _commit: &str,
            _depth: u32,
        ) -> Result<PathBuf, ScmError> {
            let target = tempfile::tempdir().unwrap().keep();
            for entry in std::fs::read_dir(&self.fixture)? {
                let entry = entry?;
                std::fs::copy(entry.path(), target.join(entry.file_name()))?;
            }
            Ok(target)
        }

        async fn apply_patch(
            &self,
            _repo_path: &Path,
            _diff: &str,
            _check_only: bool,
        ) -> Result<ApplyOutcome, ScmError> {
            if self.fail_patch {
                Ok(ApplyOutcome {
                    success: false,
                    error_message: Some("corrupt patch".to_string()),
                })
            } else {
                Ok(ApplyOutcome {
                    success: true,
                    error_message: None,
                })
            }
        }

        fn cleanup(&self, repo_path: &Path) {
            let _ = std::fs::remove_dir_all(repo_path);
        }
    }

    fn python_fixture() -> PathBuf {
        let dir = tempfile::tempdir().unwrap().keep();
        std::fs::write(
            dir.join("pyproject.toml"),
            "[tool.poetry.dependencies]\npython = \"^3.11\"\n",
        )
        .unwrap();
        dir
    }

    fn request() -> ValidationRequest {
        ValidationRequest {
            fix_id: "run-1".into(),
            event_id: Uuid::new_v4(),
            repo_url: "https://example.invalid/acme/widgets.git".into(),
            branch: "main".into(),
            commit_sha: "abc123".into(),
            diff: "--- a/pyproject.toml\n+++ b/pyproject.toml\n@@ -1 +1,2 @@\n [tool.poetry.dependencies]\n+requests = \"^1.0.0\"\n".into(),
            adapter_name: "python".into(),
            validation_steps: None,
            allow_network: true,
        }
    }

    fn passing_runtime() -> Arc<MockRuntime> {
        Arc::new(MockRuntime::with_script(vec![
            ScriptedExec {
                command_prefix: "pip".into(),
                result: ExecResult {
                    exit_code: Some(0),
                    stdout: "installed".into(),
                    stderr: String::new(),
                    timed_out: false,
                },
            },
            ScriptedExec {
                command_prefix: "python".into(),
                result: ExecResult {
                    exit_code: Some(0),
                    stdout: "5 passed in 1.2s".into(),
                    stderr: String::new(),
                    timed_out: false,
                },
            },
        ]))
    }

    #[tokio::test]
    async fn test_happy_path_passes() {
        let provider = Arc::new(FixtureProvider {
            fixture: python_fixture(),
            fail_patch: false,
        });
        let runtime = passing_runtime();
        let orchestrator =
            ValidationOrchestrator::new(provider, Arc::clone(&runtime) as _).without_scans();
        let result = orchestrator.validate(&request()).await.unwrap();

        assert_eq!(result.status, ValidationStatus::Passed);
        assert!(result.is_successful());
        assert_eq!(result.framework_detected.as_deref(), Some("pytest"));
        assert_eq!(result.tests_passed, 5);
        assert_eq!(result.tests_failed, 0);
        assert!(result.steps_completed.contains(&"patch".to_string()));
        assert!(result.steps_completed.contains(&"cleanup".to_string()));
        // install ran before the test command
        let calls = runtime.recorded_calls();
        assert_eq!(calls[0][0], "pip");
        assert_eq!(calls[1][0], "python");
    }

    #[tokio::test]
    async fn test_failing_tests_map_to_failed() {
        let provider = Arc::new(FixtureProvider {
            fixture: python_fixture(),
            fail_patch: false,
        });
        let runtime = Arc::new(MockRuntime::with_script(vec![
            ScriptedExec {
                command_prefix: "pip".into(),
                result: ExecResult {
                    exit_code: Some(0),
                    stdout: String::new(),
                    stderr: String::new(),
                    timed_out: false,
                },
            },
            ScriptedExec {
                command_prefix: "python".into(),
                result: ExecResult {
                    exit_code: Some(1),
                    stdout: "1 failed, 4 passed in 2.0s".into(),
                    stderr: String::new(),
                    timed_out: false,
                },
            },
        ]));
        let orchestrator = ValidationOrchestrator::new(provider, runtime).without_scans();
        let result = orchestrator.validate(&request()).await.unwrap();

        assert_eq!(result.status, ValidationStatus::Failed);
        assert!(!result.is_successful());
        assert_eq!(result.tests_failed, 1);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_timeout() {
        let provider = Arc::new(FixtureProvider {
            fixture: python_fixture(),
            fail_patch: false,
        });
        let runtime = Arc::new(MockRuntime::with_script(vec![
            ScriptedExec {
                command_prefix: "pip".into(),
                result: ExecResult {
                    exit_code: Some(0),
                    stdout: String::new(),
                    stderr: String::new(),
                    timed_out: false,
                },
            },
            ScriptedExec {
                command_prefix: "python".into(),
                result: ExecResult {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    timed_out: true,
                },
            },
        ]));
        let orchestrator = ValidationOrchestrator::new(provider, runtime).without_scans();
        let result = orchestrator.validate(&request()).await.unwrap();
        assert_eq!(result.status, ValidationStatus::Timeout);
    }

    #[tokio::test]
    async fn test_patch_failure_is_error() {
        let provider = Arc::new(FixtureProvider {
            fixture: python_fixture(),
            fail_patch: true,
        });
        let orchestrator =
            ValidationOrchestrator::new(provider, Arc::new(MockRuntime::default())).without_scans();
        let result = orchestrator.validate(&request()).await.unwrap();
        assert_eq!(result.status, ValidationStatus::Error);
        assert!(result.error_message.unwrap().contains("Patch failed"));
    }

    #[tokio::test]
    async fn test_runtime_transport_failure_is_transient() {
        let provider = Arc::new(FixtureProvider {
            fixture: python_fixture(),
            fail_patch: false,
        });
        // Empty script: the first exec (install) hits ScriptExhausted,
        // which stands in for a daemon connection error.
        let runtime = Arc::new(MockRuntime::with_script(vec![]));
        let orchestrator = ValidationOrchestrator::new(provider, runtime).without_scans();
        let err = orchestrator.validate(&request()).await.unwrap_err();
        assert!(matches!(err, SandboxError::Runtime { phase: "installing", .. }));
    }

    #[tokio::test]
    async fn test_adapter_steps_override_framework_defaults() {
        let provider = Arc::new(FixtureProvider {
            fixture: python_fixture(),
            fail_patch: false,
        });
        let runtime = Arc::new(MockRuntime::always_passing("3 passed"));
        let orchestrator =
            ValidationOrchestrator::new(provider, Arc::clone(&runtime) as _).without_scans();
        let mut request = request();
        request.validation_steps = Some(vec![ValidationStep::new(
            "test",
            &["pytest", "--custom"],
            60,
        )]);
        let result = orchestrator.validate(&request).await.unwrap();
        assert_eq!(result.status, ValidationStatus::Passed);
        let calls = runtime.recorded_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec!["pytest".to_string(), "--custom".to_string()]);
    }
}
