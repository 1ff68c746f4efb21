//! Sandbox validation requests and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Phase/outcome of a sandbox validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Cloning,
    Patching,
    Installing,
    Running,
    Passed,
    Failed,
    Timeout,
    Error,
}

impl ValidationStatus {
    /// Whether validation ended and can no longer advance.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Passed | Self::Failed | Self::Timeout | Self::Error
        )
    }
}

/// A concrete command the sandbox should run, prescribed by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationStep {
    /// Step name (`install`, `test`, ...)
    pub name: String,
    /// Command and arguments
    pub command: Vec<String>,
    /// Per-step timeout in seconds
    pub timeout_seconds: u64,
}

impl ValidationStep {
    /// Convenience constructor.
    #[must_use]
    pub fn new(name: &str, command: &[&str], timeout_seconds: u64) -> Self {
        Self {
            name: name.to_string(),
            command: command.iter().map(|s| (*s).to_string()).collect(),
            timeout_seconds,
        }
    }
}

/// Request to validate a patch in an ephemeral sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRequest {
    /// Fix identifier (the run id)
    pub fix_id: String,
    /// Event the fix belongs to
    pub event_id: Uuid,
    /// Clone URL
    pub repo_url: String,
    /// Branch to clone
    pub branch: String,
    /// Commit to check out
    pub commit_sha: String,
    /// Unified diff to apply
    pub diff: String,
    /// Adapter that produced the plan
    pub adapter_name: String,
    /// Adapter-prescribed install/test steps; framework defaults otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_steps: Option<Vec<ValidationStep>>,
    /// Whether the sandbox may reach the network
    #[serde(default)]
    pub allow_network: bool,
}

/// Outcome of a single security scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pass,
    Fail,
    Error,
    Skipped,
}

/// Result of one scanner invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    /// Scanner outcome
    pub status: ScanStatus,
    /// Number of findings
    pub findings_count: u64,
    /// Findings per severity, upper-cased severity → count
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub severity_counts: BTreeMap<String, u64>,
    /// Error detail when the scanner itself failed
    pub error_message: Option<String>,
}

impl ScanResult {
    /// A scan that did not run.
    #[must_use]
    pub fn skipped() -> Self {
        Self {
            status: ScanStatus::Skipped,
            findings_count: 0,
            severity_counts: BTreeMap::new(),
            error_message: None,
        }
    }

    /// Whether this scan blocks a passing validation.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(self.status, ScanStatus::Fail | ScanStatus::Error)
    }
}

/// Software bill of materials emitted by the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SbomInfo {
    /// Path of the SBOM file on the artifact volume
    pub path: String,
    /// SHA-256 of the SBOM content
    pub sha256: String,
    /// SBOM size in bytes
    pub size_bytes: u64,
}

/// All scans run against the patched tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Secret scan of the working tree
    pub gitleaks: Option<ScanResult>,
    /// Dependency vulnerability scan
    pub trivy: Option<ScanResult>,
    /// Optional SBOM
    pub sbom: Option<SbomInfo>,
}

impl ScanSummary {
    /// Whether any scan returned a blocking status.
    #[must_use]
    pub fn has_blocking_finding(&self) -> bool {
        self.gitleaks.as_ref().is_some_and(ScanResult::is_blocking)
            || self.trivy.as_ref().is_some_and(ScanResult::is_blocking)
    }
}

/// Final state of a sandbox validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Fix identifier
    pub fix_id: String,
    /// Event identifier
    pub event_id: Uuid,
    /// Unique id of this validation attempt
    pub validation_id: String,
    /// Phase/outcome
    pub status: ValidationStatus,
    /// Tests that passed
    pub tests_passed: u64,
    /// Tests that failed
    pub tests_failed: u64,
    /// Tests that were skipped
    pub tests_skipped: u64,
    /// Total tests observed
    pub tests_total: u64,
    /// Test framework the sandbox detected
    pub framework_detected: Option<String>,
    /// Combined stdout/stderr of the test run
    pub logs: String,
    /// Security scans
    pub scans: Option<ScanSummary>,
    /// Phases that completed, in order
    #[serde(default)]
    pub steps_completed: Vec<String>,
    /// Error detail for `error` status
    pub error_message: Option<String>,
    /// Wall-clock time of the validation
    pub execution_time_seconds: Option<f64>,
    /// When the validation finished
    pub completed_at: Option<DateTime<Utc>>,
}

impl ValidationResult {
    /// Empty result in `pending` state.
    #[must_use]
    pub fn pending(fix_id: &str, event_id: Uuid, validation_id: &str) -> Self {
        Self {
            fix_id: fix_id.to_string(),
            event_id,
            validation_id: validation_id.to_string(),
            status: ValidationStatus::Pending,
            tests_passed: 0,
            tests_failed: 0,
            tests_skipped: 0,
            tests_total: 0,
            framework_detected: None,
            logs: String::new(),
            scans: None,
            steps_completed: vec![],
            error_message: None,
            execution_time_seconds: None,
            completed_at: None,
        }
    }

    /// `passed` requires zero failed tests and no blocking scan finding.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.status == ValidationStatus::Passed
            && self.tests_failed == 0
            && !self
                .scans
                .as_ref()
                .is_some_and(ScanSummary::has_blocking_finding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(ValidationStatus::Passed.is_terminal());
        assert!(ValidationStatus::Timeout.is_terminal());
        assert!(!ValidationStatus::Installing.is_terminal());
    }

    #[test]
    fn test_blocking_scan_fails_success() {
        let mut result = ValidationResult::pending("f", Uuid::new_v4(), "v");
        result.status = ValidationStatus::Passed;
        assert!(result.is_successful());

        result.scans = Some(ScanSummary {
            gitleaks: Some(ScanResult {
                status: ScanStatus::Fail,
                findings_count: 1,
                severity_counts: BTreeMap::new(),
                error_message: None,
            }),
            trivy: None,
            sbom: None,
        });
        assert!(!result.is_successful());
    }

    #[test]
    fn test_failed_tests_fail_success() {
        let mut result = ValidationResult::pending("f", Uuid::new_v4(), "v");
        result.status = ValidationStatus::Passed;
        result.tests_failed = 2;
        assert!(!result.is_successful());
    }
}
