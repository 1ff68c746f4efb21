//! Assembled fix suggestions and their guardrail/safety snapshots.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The diff of one file within a fix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDiff {
    /// File path
    pub filename: String,
    /// Unified diff text for this file
    pub diff: String,
    /// Lines added
    pub lines_added: u64,
    /// Lines removed
    pub lines_removed: u64,
}

/// Severity of a guardrail violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GuardrailSeverity {
    Block,
    Warn,
}

/// One guardrail violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailViolation {
    /// Rule identifier (`file_scope`, `change_size`, `secret`,
    /// `destructive_command`, `diff_syntax`)
    pub rule: String,
    /// Severity
    pub severity: GuardrailSeverity,
    /// Human-readable message
    pub message: String,
    /// File the violation applies to, when file-scoped
    pub file: Option<String>,
}

/// Outcome of the guardrail check on a fix suggestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailStatus {
    /// False when any violation is BLOCK
    pub passed: bool,
    /// All violations, blocking and warning
    #[serde(default)]
    pub violations: Vec<GuardrailViolation>,
}

impl GuardrailStatus {
    /// A clean pass.
    #[must_use]
    pub fn passed() -> Self {
        Self {
            passed: true,
            violations: vec![],
        }
    }
}

/// A policy violation snapshot carried on the fix (mirrors the policy
/// engine's violations without depending on it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyViolationNote {
    /// Violation code
    pub code: String,
    /// Severity string (`BLOCK`, `WARN`)
    pub severity: String,
    /// Message
    pub message: String,
    /// File path, when file-scoped
    pub file_path: Option<String>,
}

/// Safety snapshot of the patch-level policy decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyStatus {
    /// Whether the policy allowed the patch
    pub allowed: bool,
    /// PR label the decision maps to (`safe` / `needs-review`)
    pub pr_label: String,
    /// Additive danger score
    pub danger_score: u64,
    /// Policy violations
    #[serde(default)]
    pub violations: Vec<SafetyViolationNote>,
    /// Danger reason messages
    #[serde(default)]
    pub danger_reasons: Vec<String>,
}

/// A complete fix ready for validation and PR creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixSuggestion {
    /// Event the fix addresses
    pub event_id: Uuid,
    /// Fix identifier (the run id)
    pub fix_id: String,
    /// Per-file diffs
    pub diffs: Vec<FileDiff>,
    /// Explanation assembled from the plan's rationale lines
    pub explanation: String,
    /// Short summary (≤ 200 chars)
    pub summary: String,
    /// Files the plan targets
    pub target_files: Vec<String>,
    /// Planner confidence
    pub confidence: f64,
    /// Total lines added across all diffs
    pub total_lines_added: u64,
    /// Total lines removed across all diffs
    pub total_lines_removed: u64,
    /// Guardrail check outcome
    pub guardrail_status: GuardrailStatus,
    /// Policy decision snapshot
    pub safety_status: SafetyStatus,
    /// Planner model identifier
    pub model_used: String,
}

impl FixSuggestion {
    /// Reassemble the combined unified diff from the per-file diffs.
    #[must_use]
    pub fn full_diff(&self) -> String {
        self.diffs
            .iter()
            .map(|d| d.diff.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guardrail_severity_serde_uppercase() {
        let json = serde_json::to_string(&GuardrailSeverity::Block).unwrap();
        assert_eq!(json, "\"BLOCK\"");
    }

    #[test]
    fn test_full_diff_joins_files() {
        let fix = FixSuggestion {
            event_id: Uuid::new_v4(),
            fix_id: "f".into(),
            diffs: vec![
                FileDiff {
                    filename: "a".into(),
                    diff: "--- a/a\n+++ b/a\n".into(),
                    lines_added: 0,
                    lines_removed: 0,
                },
                FileDiff {
                    filename: "b".into(),
                    diff: "--- a/b\n+++ b/b\n".into(),
                    lines_added: 0,
                    lines_removed: 0,
                },
            ],
            explanation: String::new(),
            summary: String::new(),
            target_files: vec![],
            confidence: 0.5,
            total_lines_added: 0,
            total_lines_removed: 0,
            guardrail_status: GuardrailStatus::passed(),
            safety_status: SafetyStatus {
                allowed: true,
                pr_label: "safe".into(),
                danger_score: 0,
                violations: vec![],
                danger_reasons: vec![],
            },
            model_used: "deterministic".into(),
        };
        assert!(fix.full_diff().contains("--- a/b"));
    }
}
