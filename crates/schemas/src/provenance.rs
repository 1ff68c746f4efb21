//! The immutable, redacted end-of-run provenance artifact.
//!
//! Built once per run on every exit path. Every string field has been
//! passed through the policy redactor before the artifact is persisted.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::run::TimelineEntry;
use crate::validation::ScanSummary;

/// Start/finish timestamps, ISO-8601.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceTimestamps {
    /// When the run started
    pub started_at: String,
    /// When the artifact was built
    pub finished_at: String,
}

/// Policy decision snapshot embedded in the artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenancePolicy {
    /// Whether the decisive policy check allowed the change
    pub allowed: bool,
    /// Danger score of the decisive check
    pub danger_score: u64,
    /// PR label of the decisive check
    pub label: String,
    /// Redacted violations
    #[serde(default)]
    pub violations: Vec<serde_json::Value>,
}

/// Diff measurement snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvenanceDiffStats {
    /// Files changed
    pub files_changed: u64,
    /// Lines added
    pub lines_added: u64,
    /// Lines deleted
    pub lines_deleted: u64,
}

/// Validation snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceValidation {
    /// Final validation status
    pub status: String,
    /// Tests passed
    pub tests_passed: u64,
    /// Tests failed
    pub tests_failed: u64,
    /// Tests total
    pub tests_total: u64,
    /// Redacted error message
    pub error_message: Option<String>,
    /// Validation wall-clock time
    pub execution_time_seconds: Option<f64>,
}

/// Adapter selection snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceAdapter {
    /// Adapter name
    pub name: String,
    /// Detected repository language
    pub repo_language: Option<String>,
    /// Detected plan category
    pub detected_category: Option<String>,
    /// Detection confidence
    pub confidence: Option<f64>,
    /// Redacted evidence lines
    #[serde(default)]
    pub evidence_lines: Vec<String>,
}

/// One tagged evidence line linked back to a plan operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceLine {
    /// Line index in the source log
    pub idx: usize,
    /// The (redacted) line text
    pub line: String,
    /// Tag (`error`, `stack`, `test`, `build`)
    pub tag: String,
    /// Index of the plan operation this line supports, if any
    pub operation_idx: Option<usize>,
}

/// The canonical post-mortem surface for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceArtifact {
    /// Run identifier
    pub run_id: Uuid,
    /// Event identifier
    pub failure_id: Uuid,
    /// Repository
    pub repo: String,
    /// Timestamps
    pub timestamps: ProvenanceTimestamps,
    /// Final run status
    pub status: String,
    /// Redacted error message
    pub error_message: Option<String>,
    /// Adapter snapshot
    pub adapter: Option<ProvenanceAdapter>,
    /// Redacted plan blob
    pub plan: Option<serde_json::Value>,
    /// Decisive policy snapshot (patch-level preferred over plan-level)
    pub policy: Option<ProvenancePolicy>,
    /// Diff measurement
    pub diff_stats: Option<ProvenanceDiffStats>,
    /// Security scans
    pub scans: Option<ScanSummary>,
    /// Validation snapshot
    pub validation: Option<ProvenanceValidation>,
    /// Tagged evidence lines
    #[serde(default)]
    pub evidence: Vec<EvidenceLine>,
    /// Redacted run timeline
    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,
}
