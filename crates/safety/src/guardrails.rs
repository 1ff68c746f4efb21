//! Fix-level guardrails.
//!
//! A last line of defense on the assembled [`FixSuggestion`], independent of
//! the policy engine: file scope, change size, secrets, destructive
//! commands, and diff syntax sanity.

use regex::Regex;
use std::sync::LazyLock;
use tracing::info;

use schemas::{FixSuggestion, GuardrailSeverity, GuardrailStatus, GuardrailViolation};

static SECRET_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)password\s*[=:]\s*['"][^'"]+['"]"#,
        r#"(?i)api_key\s*[=:]\s*['"][^'"]+['"]"#,
        r#"(?i)secret\s*[=:]\s*['"][^'"]+['"]"#,
        r#"(?i)token\s*[=:]\s*['"][^'"]+['"]"#,
        r"(?i)aws_access_key_id\s*[=:]",
        r"(?i)aws_secret_access_key\s*[=:]",
        r"ghp_[a-zA-Z0-9]{36}",
        r"sk-[a-zA-Z0-9]{48}",
        r"-----BEGIN\s+(RSA\s+)?PRIVATE\s+KEY-----",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static DESTRUCTIVE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\brm\s+-rf?\s+[/~]",
        r"\brmdir\s+[/~]",
        r"DROP\s+DATABASE",
        r"DROP\s+TABLE",
        r"TRUNCATE\s+TABLE",
        r"(?i)shutil\.rmtree\s*\(",
        r"(?i)os\.remove\s*\(",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Guardrail thresholds.
#[derive(Debug, Clone)]
pub struct GuardrailConfig {
    /// Maximum files a fix may touch
    pub max_files: usize,
    /// Blocking ceiling on lines changed (added + removed)
    pub max_lines_changed: u64,
    /// Warning threshold on lines changed
    pub warn_lines_threshold: u64,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            max_files: 3,
            max_lines_changed: 50,
            warn_lines_threshold: 20,
        }
    }
}

/// Validates assembled fixes against the guardrail rules.
pub struct FixGuardrails {
    config: GuardrailConfig,
}

impl Default for FixGuardrails {
    fn default() -> Self {
        Self::new(GuardrailConfig::default())
    }
}

impl FixGuardrails {
    /// Build with explicit thresholds.
    #[must_use]
    pub fn new(config: GuardrailConfig) -> Self {
        Self { config }
    }

    /// Run every check; the fix passes iff no BLOCK violation was raised.
    #[must_use]
    pub fn validate(&self, fix: &FixSuggestion) -> GuardrailStatus {
        let mut violations = Vec::new();
        self.check_file_scope(fix, &mut violations);
        self.check_change_size(fix, &mut violations);
        Self::check_no_secrets(fix, &mut violations);
        Self::check_no_destructive(fix, &mut violations);
        Self::check_diff_syntax(fix, &mut violations);

        let passed = !violations
            .iter()
            .any(|v| v.severity == GuardrailSeverity::Block);

        info!(
            passed,
            violations = violations.len(),
            fix_id = %fix.fix_id,
            "Guardrail validation complete"
        );

        GuardrailStatus { passed, violations }
    }

    fn check_file_scope(&self, fix: &FixSuggestion, violations: &mut Vec<GuardrailViolation>) {
        if fix.diffs.len() > self.config.max_files {
            violations.push(GuardrailViolation {
                rule: "file_scope".to_string(),
                severity: GuardrailSeverity::Block,
                message: format!(
                    "Fix touches {} files (max {})",
                    fix.diffs.len(),
                    self.config.max_files
                ),
                file: None,
            });
        }
        for diff in &fix.diffs {
            if !fix.target_files.iter().any(|f| f == &diff.filename) {
                violations.push(GuardrailViolation {
                    rule: "file_scope".to_string(),
                    severity: GuardrailSeverity::Block,
                    message: "Diff touches a file outside the plan's target files".to_string(),
                    file: Some(diff.filename.clone()),
                });
            }
        }
    }

    fn check_change_size(&self, fix: &FixSuggestion, violations: &mut Vec<GuardrailViolation>) {
        let total = fix.total_lines_added + fix.total_lines_removed;
        if total > self.config.max_lines_changed {
            violations.push(GuardrailViolation {
                rule: "change_size".to_string(),
                severity: GuardrailSeverity::Block,
                message: format!(
                    "Fix changes {total} lines (max {})",
                    self.config.max_lines_changed
                ),
                file: None,
            });
        } else if total > self.config.warn_lines_threshold {
            violations.push(GuardrailViolation {
                rule: "change_size".to_string(),
                severity: GuardrailSeverity::Warn,
                message: format!(
                    "Fix changes {total} lines, above the warning threshold of {}",
                    self.config.warn_lines_threshold
                ),
                file: None,
            });
        }
    }

    fn check_no_secrets(fix: &FixSuggestion, violations: &mut Vec<GuardrailViolation>) {
        for diff in &fix.diffs {
            for line in diff.diff.lines() {
                if !line.starts_with('+') || line.starts_with("+++") {
                    continue;
                }
                if SECRET_PATTERNS.iter().any(|p| p.is_match(line)) {
                    violations.push(GuardrailViolation {
                        rule: "secret".to_string(),
                        severity: GuardrailSeverity::Block,
                        message: "Added line matches a secret pattern".to_string(),
                        file: Some(diff.filename.clone()),
                    });
                    break;
                }
            }
        }
    }

    fn check_no_destructive(fix: &FixSuggestion, violations: &mut Vec<GuardrailViolation>) {
        for diff in &fix.diffs {
            for line in diff.diff.lines() {
                if !line.starts_with('+') || line.starts_with("+++") {
                    continue;
                }
                if DESTRUCTIVE_PATTERNS.iter().any(|p| p.is_match(line)) {
                    violations.push(GuardrailViolation {
                        rule: "destructive_command".to_string(),
                        severity: GuardrailSeverity::Block,
                        message: "Added line matches a destructive command pattern".to_string(),
                        file: Some(diff.filename.clone()),
                    });
                    break;
                }
            }
        }
    }

    fn check_diff_syntax(fix: &FixSuggestion, violations: &mut Vec<GuardrailViolation>) {
        for diff in &fix.diffs {
            let has_old = diff.diff.lines().any(|l| l.starts_with("--- "));
            let has_new = diff.diff.lines().any(|l| l.starts_with("+++ "));
            let has_hunk = diff.diff.lines().any(|l| l.starts_with("@@"));
            if !(has_old && has_new && has_hunk) {
                violations.push(GuardrailViolation {
                    rule: "diff_syntax".to_string(),
                    severity: GuardrailSeverity::Block,
                    message: "File diff is missing ---/+++/@@ structure".to_string(),
                    file: Some(diff.filename.clone()),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemas::{FileDiff, SafetyStatus};
    use uuid::Uuid;

    fn fix_with(diffs: Vec<FileDiff>, added: u64, removed: u64) -> FixSuggestion {
        let target_files = diffs.iter().map(|d| d.filename.clone()).collect();
        FixSuggestion {
            event_id: Uuid::new_v4(),
            fix_id: "fix-1".into(),
            diffs,
            explanation: String::new(),
            summary: String::new(),
            target_files,
            confidence: 0.8,
            total_lines_added: added,
            total_lines_removed: removed,
            guardrail_status: GuardrailStatus::passed(),
            safety_status: SafetyStatus {
                allowed: true,
                pr_label: "safe".into(),
                danger_score: 0,
                violations: vec![],
                danger_reasons: vec![],
            },
            model_used: "deterministic".into(),
        }
    }

    fn file_diff(name: &str, added_line: &str) -> FileDiff {
        FileDiff {
            filename: name.to_string(),
            diff: format!("--- a/{name}\n+++ b/{name}\n@@ -1 +1,2 @@\n context\n+{added_line}\n"),
            lines_added: 1,
            lines_removed: 0,
        }
    }

    #[test]
    fn test_clean_fix_passes() {
        let fix = fix_with(vec![file_diff("requirements.txt", "requests==1.0.0")], 1, 0);
        let status = FixGuardrails::default().validate(&fix);
        assert!(status.passed);
        assert!(status.violations.is_empty());
    }

    #[test]
    fn test_secret_in_addition_blocks() {
        let fix = fix_with(
            vec![file_diff("config.py", "password = \"hunter2-value\"")],
            1,
            0,
        );
        let status = FixGuardrails::default().validate(&fix);
        assert!(!status.passed);
        assert!(status.violations.iter().any(|v| v.rule == "secret"));
    }

    #[test]
    fn test_destructive_command_blocks() {
        let fix = fix_with(vec![file_diff("deploy.sh", "rm -rf /opt/app")], 1, 0);
        let status = FixGuardrails::default().validate(&fix);
        assert!(!status.passed);
        assert!(status
            .violations
            .iter()
            .any(|v| v.rule == "destructive_command"));
    }

    #[test]
    fn test_oversized_change_blocks_and_medium_warns() {
        let mut fix = fix_with(vec![file_diff("src/app.py", "x = 1")], 60, 0);
        let status = FixGuardrails::default().validate(&fix);
        assert!(!status.passed);

        fix.total_lines_added = 30;
        let status = FixGuardrails::default().validate(&fix);
        assert!(status.passed);
        assert!(status
            .violations
            .iter()
            .any(|v| v.severity == GuardrailSeverity::Warn));
    }

    #[test]
    fn test_file_outside_plan_blocks() {
        let mut fix = fix_with(vec![file_diff("src/app.py", "x = 1")], 1, 0);
        fix.target_files = vec!["other.py".to_string()];
        let status = FixGuardrails::default().validate(&fix);
        assert!(!status.passed);
        assert!(status.violations.iter().any(|v| v.rule == "file_scope"));
    }

    #[test]
    fn test_broken_diff_syntax_blocks() {
        let fix = fix_with(
            vec![FileDiff {
                filename: "a.py".into(),
                diff: "+just an added line\n".into(),
                lines_added: 1,
                lines_removed: 0,
            }],
            1,
            0,
        );
        let status = FixGuardrails::default().validate(&fix);
        assert!(!status.passed);
        assert!(status.violations.iter().any(|v| v.rule == "diff_syntax"));
    }
}
