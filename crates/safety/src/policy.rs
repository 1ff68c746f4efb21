//! The safety policy model and the engine that evaluates plan intents and
//! patches against it.

use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::danger::{score_patch, score_plan_intent, DangerReason};
use crate::diff::{normalize_path, parse_unified_diff};

/// Path allow/deny rules, glob patterns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathRules {
    /// When non-empty, every touched file must match at least one pattern
    #[serde(default)]
    pub allowed: Vec<String>,
    /// A touched file must match none of these
    #[serde(default)]
    pub forbidden: Vec<String>,
}

/// Hard limits on patch size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchLimits {
    /// Maximum files touched
    pub max_files: u64,
    /// Maximum lines added
    pub max_lines_added: u64,
    /// Maximum lines removed
    pub max_lines_removed: u64,
    /// Maximum diff size in bytes
    pub max_diff_bytes: u64,
}

impl Default for PatchLimits {
    fn default() -> Self {
        Self {
            max_files: 5,
            max_lines_added: 200,
            max_lines_removed: 100,
            max_diff_bytes: 128 * 1024,
        }
    }
}

/// Secret detection rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRules {
    /// Regexes a diff must not match
    #[serde(default = "SecretRules::default_patterns")]
    pub forbidden_patterns: Vec<String>,
}

impl SecretRules {
    fn default_patterns() -> Vec<String> {
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
        .map(|s| (*s).to_string())
        .collect()
    }
}

impl Default for SecretRules {
    fn default() -> Self {
        Self {
            forbidden_patterns: Self::default_patterns(),
        }
    }
}

/// A sensitive path contributing danger weight when touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitivePath {
    /// Glob pattern
    pub pattern: String,
    /// Weight added per touched file matching the pattern
    pub weight: u64,
}

/// Danger scoring weights. Scoring is additive; each contribution is
/// reported as a [`DangerReason`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DangerRules {
    /// Per-file weights for sensitive paths
    #[serde(default = "DangerRules::default_sensitive_paths")]
    pub sensitive_paths: Vec<SensitivePath>,
    /// Files-changed count above which each extra file adds weight
    pub file_count_threshold: u64,
    /// Weight per file above the threshold
    pub file_count_weight: u64,
    /// Lines touched (added + removed) above which each extra line adds weight
    pub lines_threshold: u64,
    /// Weight per line above the threshold
    pub lines_weight: u64,
    /// Plan-category specific weights
    #[serde(default = "DangerRules::default_category_weights")]
    pub category_weights: BTreeMap<String, u64>,
    /// Fixed weight added when a secret-like string appears in additions
    pub secret_weight: u64,
    /// Highest score still labelled `safe`
    pub safe_max: u64,
}

impl DangerRules {
    fn default_sensitive_paths() -> Vec<SensitivePath> {
        [
            ("infra/**", 20),
            (".github/**", 20),
            ("**/Dockerfile", 10),
            ("Dockerfile", 10),
            ("**/*.tf", 15),
            ("helm/**", 15),
        ]
        .iter()
        .map(|(p, w)| SensitivePath {
            pattern: (*p).to_string(),
            weight: *w,
        })
        .collect()
    }

    fn default_category_weights() -> BTreeMap<String, u64> {
        let mut weights = BTreeMap::new();
        weights.insert("docker_pin_base_image".to_string(), 10);
        weights.insert("docker_apt_get_cleanup".to_string(), 8);
        weights.insert("node_lockfile_mismatch".to_string(), 6);
        weights.insert("java_plugin_version_missing".to_string(), 5);
        weights.insert("go_mod_tidy".to_string(), 3);
        weights.insert("remove_unused".to_string(), 1);
        weights
    }
}

impl Default for DangerRules {
    fn default() -> Self {
        Self {
            sensitive_paths: Self::default_sensitive_paths(),
            file_count_threshold: 2,
            file_count_weight: 5,
            lines_threshold: 40,
            lines_weight: 1,
            category_weights: Self::default_category_weights(),
            secret_weight: 50,
            safe_max: 25,
        }
    }
}

/// Immutable safety policy. Loaded once at process start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafetyPolicy {
    /// Path allow/deny rules
    #[serde(default)]
    pub paths: PathRules,
    /// Patch size limits
    #[serde(default)]
    pub patch_limits: PatchLimits,
    /// Secret detection
    #[serde(default)]
    pub secrets: SecretRules,
    /// Danger scoring weights
    #[serde(default)]
    pub danger: DangerRules,
}

impl SafetyPolicy {
    /// The shipped default: common CI-control paths forbidden, modest
    /// patch limits, standard secret patterns.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            paths: PathRules {
                allowed: vec![],
                forbidden: vec![
                    ".github/**".to_string(),
                    ".gitlab-ci.yml".to_string(),
                    "infra/**".to_string(),
                    "secrets/**".to_string(),
                    "**/*.pem".to_string(),
                    "**/id_rsa*".to_string(),
                    "**/.env".to_string(),
                    "**/.env.*".to_string(),
                ],
            },
            patch_limits: PatchLimits::default(),
            secrets: SecretRules::default(),
            danger: DangerRules::default(),
        }
    }

    /// Merge a repo-scoped override over this policy, section by section.
    /// A section present in `overrides` replaces the whole section.
    #[must_use]
    pub fn merged_with(&self, overrides: PolicyOverrides) -> Self {
        Self {
            paths: overrides.paths.unwrap_or_else(|| self.paths.clone()),
            patch_limits: overrides
                .patch_limits
                .unwrap_or_else(|| self.patch_limits.clone()),
            secrets: overrides.secrets.unwrap_or_else(|| self.secrets.clone()),
            danger: overrides.danger.unwrap_or_else(|| self.danger.clone()),
        }
    }
}

/// Per-repository policy override fragment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyOverrides {
    #[serde(default)]
    pub paths: Option<PathRules>,
    #[serde(default)]
    pub patch_limits: Option<PatchLimits>,
    #[serde(default)]
    pub secrets: Option<SecretRules>,
    #[serde(default)]
    pub danger: Option<DangerRules>,
}

/// Severity of a policy violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicySeverity {
    Block,
    Warn,
}

/// One policy violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyViolation {
    /// Violation code (`forbidden_path`, `path_not_allowed`, `max_files`,
    /// `max_lines_added`, `max_lines_removed`, `max_diff_bytes`,
    /// `secret_pattern`)
    pub code: String,
    /// Severity
    pub severity: PolicySeverity,
    /// Human-readable message
    pub message: String,
    /// File path, for path violations
    pub file_path: Option<String>,
}

impl PolicyViolation {
    fn block(code: &str, message: String, file_path: Option<String>) -> Self {
        Self {
            code: code.to_string(),
            severity: PolicySeverity::Block,
            message,
            file_path,
        }
    }
}

/// PR label derived from a policy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrLabel {
    #[serde(rename = "safe")]
    Safe,
    #[serde(rename = "needs-review")]
    NeedsReview,
}

impl PrLabel {
    /// Label text as applied to the PR.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::NeedsReview => "needs-review",
        }
    }
}

/// The policy engine's verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// False iff any violation is BLOCK
    pub allowed: bool,
    /// All violations
    pub violations: Vec<PolicyViolation>,
    /// Additive danger score
    pub danger_score: u64,
    /// Each score contribution
    pub danger_reasons: Vec<DangerReason>,
    /// `safe` iff allowed and the score is within `danger.safe_max`
    pub pr_label: PrLabel,
}

/// What a plan intends to do, before any patch exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanIntent {
    /// Files the plan targets
    pub target_files: Vec<String>,
    /// Plan category
    pub category: String,
    /// Operation type names the plan uses
    pub operation_types: Vec<String>,
}

/// Evaluates plans and patches against a [`SafetyPolicy`].
///
/// The engine is immutable after construction; secret regexes and path
/// globs are compiled once.
pub struct PolicyEngine {
    policy: SafetyPolicy,
    secret_patterns: Vec<Regex>,
    allowed_globs: Vec<Pattern>,
    forbidden_globs: Vec<Pattern>,
}

impl PolicyEngine {
    /// Compile the policy. Invalid regexes and globs are skipped with a
    /// warning rather than failing the whole engine.
    #[must_use]
    pub fn new(policy: SafetyPolicy) -> Self {
        let secret_patterns = policy
            .secrets
            .forbidden_patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "Skipping invalid secret pattern");
                    None
                }
            })
            .collect();
        let compile = |patterns: &[String]| -> Vec<Pattern> {
            patterns
                .iter()
                .filter_map(|p| match Pattern::new(p) {
                    Ok(g) => Some(g),
                    Err(e) => {
                        warn!(pattern = %p, error = %e, "Skipping invalid path glob");
                        None
                    }
                })
                .collect()
        };
        let allowed_globs = compile(&policy.paths.allowed);
        let forbidden_globs = compile(&policy.paths.forbidden);
        Self {
            policy,
            secret_patterns,
            allowed_globs,
            forbidden_globs,
        }
    }

    /// The policy this engine was built from.
    #[must_use]
    pub fn policy(&self) -> &SafetyPolicy {
        &self.policy
    }

    fn matches_any(path: &str, patterns: &[Pattern]) -> bool {
        patterns.iter().any(|p| p.matches(path))
    }

    fn check_path(&self, path: &str, forbidden_msg: &str, allow_msg: &str) -> Option<PolicyViolation> {
        let normalized = normalize_path(path);
        if Self::matches_any(&normalized, &self.forbidden_globs) {
            return Some(PolicyViolation::block(
                "forbidden_path",
                forbidden_msg.to_string(),
                Some(normalized),
            ));
        }
        if !self.allowed_globs.is_empty() && !Self::matches_any(&normalized, &self.allowed_globs) {
            return Some(PolicyViolation::block(
                "path_not_allowed",
                allow_msg.to_string(),
                Some(normalized),
            ));
        }
        None
    }

    fn decide(&self, violations: Vec<PolicyViolation>, danger: (u64, Vec<DangerReason>)) -> PolicyDecision {
        let (danger_score, danger_reasons) = danger;
        let allowed = !violations
            .iter()
            .any(|v| v.severity == PolicySeverity::Block);
        let pr_label = if allowed && danger_score <= self.policy.danger.safe_max {
            PrLabel::Safe
        } else {
            PrLabel::NeedsReview
        };
        PolicyDecision {
            allowed,
            violations,
            danger_score,
            danger_reasons,
            pr_label,
        }
    }

    /// Evaluate a plan intent: path rules plus intent-level danger.
    #[must_use]
    pub fn evaluate_plan(&self, intent: &PlanIntent) -> PolicyDecision {
        let mut violations = Vec::new();
        for path in &intent.target_files {
            if let Some(v) = self.check_path(
                path,
                "Target file is forbidden by policy",
                "Target file is not in the allowed path set",
            ) {
                violations.push(v);
            }
        }
        let danger = score_plan_intent(intent, &self.policy.danger);
        self.decide(violations, danger)
    }

    /// Evaluate a generated patch: parse, apply path rules per touched
    /// file, enforce size limits, scan for secrets, score danger.
    #[must_use]
    pub fn evaluate_patch(&self, diff_text: &str) -> PolicyDecision {
        let mut violations = Vec::new();

        let parsed = match parse_unified_diff(diff_text) {
            Ok(parsed) => parsed,
            Err(e) => {
                violations.push(PolicyViolation::block(
                    "malformed_diff",
                    format!("Patch could not be parsed: {e}"),
                    None,
                ));
                return self.decide(violations, (0, vec![]));
            }
        };

        for file in &parsed.files {
            if let Some(v) = self.check_path(
                &file.path,
                "Patch touches a forbidden path",
                "Patch touches a path not in the allowlist",
            ) {
                violations.push(v);
            }
        }

        let limits = &self.policy.patch_limits;
        if parsed.total_files > limits.max_files {
            violations.push(PolicyViolation::block(
                "max_files",
                format!(
                    "Patch modifies {} files (max {})",
                    parsed.total_files, limits.max_files
                ),
                None,
            ));
        }
        if parsed.total_lines_added > limits.max_lines_added {
            violations.push(PolicyViolation::block(
                "max_lines_added",
                format!(
                    "Patch adds {} lines (max {})",
                    parsed.total_lines_added, limits.max_lines_added
                ),
                None,
            ));
        }
        if parsed.total_lines_removed > limits.max_lines_removed {
            violations.push(PolicyViolation::block(
                "max_lines_removed",
                format!(
                    "Patch removes {} lines (max {})",
                    parsed.total_lines_removed, limits.max_lines_removed
                ),
                None,
            ));
        }
        if parsed.diff_bytes > limits.max_diff_bytes {
            violations.push(PolicyViolation::block(
                "max_diff_bytes",
                format!(
                    "Patch size is {} bytes (max {})",
                    parsed.diff_bytes, limits.max_diff_bytes
                ),
                None,
            ));
        }

        if self.secret_patterns.iter().any(|p| p.is_match(diff_text)) {
            violations.push(PolicyViolation::block(
                "secret_pattern",
                "Patch contains a forbidden secret/credential pattern".to_string(),
                None,
            ));
        }

        let secret_hit = self
            .secret_patterns
            .iter()
            .any(|p| added_lines(diff_text).any(|line| p.is_match(line)));
        let danger = score_patch(&parsed, secret_hit, &self.policy.danger);
        self.decide(violations, danger)
    }
}

/// Iterate the added lines of a diff, headers excluded.
fn added_lines(diff_text: &str) -> impl Iterator<Item = &str> {
    diff_text
        .lines()
        .filter(|l| l.starts_with('+') && !l.starts_with("+++"))
}
