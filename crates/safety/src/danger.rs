//! Additive, policy-weighted danger scoring.
//!
//! Each contribution is reported as a [`DangerReason`] so reviewers can see
//! exactly where a score came from. The score maps to the PR label in the
//! policy engine: within `safe_max` means `safe`, anything above means
//! `needs-review`.

use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::diff::ParsedDiff;
use crate::policy::{DangerRules, PlanIntent};

/// One contribution to the danger score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DangerReason {
    /// Contribution code (`path-risk`, `file-count`, `lines-touched`,
    /// `category-risk`, `secret-risk`)
    pub code: String,
    /// Weight added
    pub weight: u64,
    /// Human-readable message
    pub message: String,
}

impl DangerReason {
    fn new(code: &str, weight: u64, message: String) -> Self {
        Self {
            code: code.to_string(),
            weight,
            message,
        }
    }
}

fn path_risk(paths: &[String], rules: &DangerRules, reasons: &mut Vec<DangerReason>) -> u64 {
    let mut total = 0;
    for sensitive in &rules.sensitive_paths {
        let Ok(pattern) = Pattern::new(&sensitive.pattern) else {
            continue;
        };
        for path in paths {
            if pattern.matches(path) {
                total += sensitive.weight;
                reasons.push(DangerReason::new(
                    "path-risk",
                    sensitive.weight,
                    format!("{path} matches sensitive pattern {}", sensitive.pattern),
                ));
            }
        }
    }
    total
}

fn file_count_risk(count: u64, rules: &DangerRules, reasons: &mut Vec<DangerReason>) -> u64 {
    if count <= rules.file_count_threshold {
        return 0;
    }
    let excess = count - rules.file_count_threshold;
    let weight = excess * rules.file_count_weight;
    reasons.push(DangerReason::new(
        "file-count",
        weight,
        format!(
            "{count} files changed, {excess} above the threshold of {}",
            rules.file_count_threshold
        ),
    ));
    weight
}

fn lines_risk(lines: u64, rules: &DangerRules, reasons: &mut Vec<DangerReason>) -> u64 {
    if lines <= rules.lines_threshold {
        return 0;
    }
    let excess = lines - rules.lines_threshold;
    let weight = excess * rules.lines_weight;
    reasons.push(DangerReason::new(
        "lines-touched",
        weight,
        format!(
            "{lines} lines touched, {excess} above the threshold of {}",
            rules.lines_threshold
        ),
    ));
    weight
}

fn category_risk(category: &str, rules: &DangerRules, reasons: &mut Vec<DangerReason>) -> u64 {
    let Some(weight) = rules.category_weights.get(category).copied() else {
        return 0;
    };
    reasons.push(DangerReason::new(
        "category-risk",
        weight,
        format!("category {category} carries inherent risk"),
    ));
    weight
}

/// Score a plan intent before any patch exists.
#[must_use]
pub fn score_plan_intent(intent: &PlanIntent, rules: &DangerRules) -> (u64, Vec<DangerReason>) {
    let mut reasons = Vec::new();
    let mut score = 0;
    score += path_risk(&intent.target_files, rules, &mut reasons);
    score += file_count_risk(intent.target_files.len() as u64, rules, &mut reasons);
    score += category_risk(&intent.category, rules, &mut reasons);
    (score, reasons)
}

/// Score a measured patch. `secret_in_additions` is the policy engine's
/// verdict on the added lines only.
#[must_use]
pub fn score_patch(
    parsed: &ParsedDiff,
    secret_in_additions: bool,
    rules: &DangerRules,
) -> (u64, Vec<DangerReason>) {
    let mut reasons = Vec::new();
    let mut score = 0;
    let paths = parsed.paths();
    score += path_risk(&paths, rules, &mut reasons);
    score += file_count_risk(parsed.total_files, rules, &mut reasons);
    score += lines_risk(
        parsed.total_lines_added + parsed.total_lines_removed,
        rules,
        &mut reasons,
    );
    if secret_in_additions {
        score += rules.secret_weight;
        reasons.push(DangerReason::new(
            "secret-risk",
            rules.secret_weight,
            "a secret-like string appears in the added lines".to_string(),
        ));
    }
    (score, reasons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::ParsedDiffFile;

    fn rules() -> DangerRules {
        DangerRules::default()
    }

    fn parsed(files: &[(&str, u64, u64)]) -> ParsedDiff {
        let files: Vec<ParsedDiffFile> = files
            .iter()
            .map(|(p, a, r)| ParsedDiffFile {
                path: (*p).to_string(),
                lines_added: *a,
                lines_removed: *r,
            })
            .collect();
        ParsedDiff {
            total_files: files.len() as u64,
            total_lines_added: files.iter().map(|f| f.lines_added).sum(),
            total_lines_removed: files.iter().map(|f| f.lines_removed).sum(),
            diff_bytes: 100,
            files,
        }
    }

    #[test]
    fn test_small_patch_scores_zero() {
        let (score, reasons) = score_patch(&parsed(&[("requirements.txt", 1, 0)]), false, &rules());
        assert_eq!(score, 0);
        assert!(reasons.is_empty());
    }

    #[test]
    fn test_sensitive_path_scores() {
        let (score, reasons) = score_patch(&parsed(&[("infra/main.tf", 1, 0)]), false, &rules());
        assert!(score > 0);
        assert!(reasons.iter().any(|r| r.code == "path-risk"));
    }

    #[test]
    fn test_file_count_linear_above_threshold() {
        let r = rules();
        let (score3, _) =
            score_patch(&parsed(&[("a", 1, 0), ("b", 1, 0), ("c", 1, 0)]), false, &r);
        let (score4, _) = score_patch(
            &parsed(&[("a", 1, 0), ("b", 1, 0), ("c", 1, 0), ("d", 1, 0)]),
            false,
            &r,
        );
        assert_eq!(score4 - score3, r.file_count_weight);
    }

    #[test]
    fn test_lines_risk_above_threshold() {
        let r = rules();
        let (score, reasons) = score_patch(&parsed(&[("a", r.lines_threshold + 10, 0)]), false, &r);
        assert_eq!(score, 10 * r.lines_weight);
        assert!(reasons.iter().any(|x| x.code == "lines-touched"));
    }

    #[test]
    fn test_secret_risk_fixed_weight() {
        let r = rules();
        let (score, reasons) = score_patch(&parsed(&[("a", 1, 0)]), true, &r);
        assert_eq!(score, r.secret_weight);
        assert!(reasons.iter().any(|x| x.code == "secret-risk"));
    }

    #[test]
    fn test_category_risk_on_intent() {
        let intent = PlanIntent {
            target_files: vec!["Dockerfile".to_string()],
            category: "docker_pin_base_image".to_string(),
            operation_types: vec!["update_config".to_string()],
        };
        let (score, reasons) = score_plan_intent(&intent, &rules());
        assert!(reasons.iter().any(|r| r.code == "category-risk"));
        assert!(reasons.iter().any(|r| r.code == "path-risk"));
        assert!(score >= 10);
    }
}
