//! Provenance artifact assembly.
//!
//! Builds the immutable end-of-run artifact from the run's stage blobs,
//! with every string passed through the policy redactor, plus the tagged
//! evidence lines linked back to plan operations.

use regex::Regex;
use std::sync::LazyLock;

use safety::Redactor;
use schemas::{
    EvidenceLine, FixPipelineRun, FixPlan, OperationDetails, ProvenanceAdapter,
    ProvenanceArtifact, ProvenanceDiffStats, ProvenancePolicy, ProvenanceTimestamps,
    ProvenanceValidation, ValidationResult,
};

/// Evidence lines kept per artifact.
const MAX_EVIDENCE_LINES: usize = 30;

static ERROR_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(error|fatal|exception|panic)\b").unwrap());
static STACK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s+(at |File ")|Traceback \(most recent call last\)"#).unwrap());
static TEST_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(FAILED|ERROR) [\w/.-]+::|^--- FAIL: ").unwrap());
static BUILD_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^:\s]+:\d+:\d+: (error|warning)|^npm ERR!").unwrap());

/// Tag interesting log lines, cap the total, and link each line to the
/// first plan operation it supports.
#[must_use]
pub fn extract_evidence(log_text: &str, plan: Option<&FixPlan>, redactor: &Redactor) -> Vec<EvidenceLine> {
    let mut evidence = Vec::new();
    for (idx, line) in log_text.lines().enumerate() {
        let tag = if TEST_LINE.is_match(line) {
            "test"
        } else if BUILD_LINE.is_match(line) {
            "build"
        } else if STACK_LINE.is_match(line) {
            "stack"
        } else if ERROR_LINE.is_match(line) {
            "error"
        } else {
            continue;
        };

        let operation_idx = plan.and_then(|p| {
            p.operations.iter().position(|op| {
                if line.contains(op.file.as_str()) {
                    return true;
                }
                match &op.details {
                    OperationDetails::Dependency { name, .. } => line.contains(name.as_str()),
                    OperationDetails::RemoveImport { name, .. } => line.contains(name.as_str()),
                    _ => false,
                }
            })
        });

        evidence.push(EvidenceLine {
            idx,
            line: redactor.redact_text(line.trim()),
            tag: tag.to_string(),
            operation_idx,
        });
        if evidence.len() >= MAX_EVIDENCE_LINES {
            break;
        }
    }
    evidence
}

/// Build the redacted provenance artifact for a run.
#[must_use]
pub fn build_provenance_artifact(
    run: &FixPipelineRun,
    repo: &str,
    redactor: &Redactor,
) -> ProvenanceArtifact {
    let policy_json = run.patch_policy_json.as_ref().or(run.plan_policy_json.as_ref());
    let policy = policy_json.map(|json| ProvenancePolicy {
        allowed: json.get("allowed").and_then(serde_json::Value::as_bool).unwrap_or(false),
        danger_score: json
            .get("danger_score")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0),
        label: json
            .get("pr_label")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("needs-review")
            .to_string(),
        violations: json
            .get("violations")
            .and_then(serde_json::Value::as_array)
            .map(|violations| violations.iter().map(|v| redactor.redact_value(v)).collect())
            .unwrap_or_default(),
    });

    let diff_stats = run.patch_stats_json.as_ref().map(|json| ProvenanceDiffStats {
        files_changed: json
            .get("total_files")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0),
        lines_added: json
            .get("total_lines_added")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0),
        lines_deleted: json
            .get("total_lines_removed")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0),
    });

    let validation_parsed: Option<ValidationResult> = run
        .validation_json
        .as_ref()
        .and_then(|json| serde_json::from_value(json.clone()).ok());
    let validation = validation_parsed.as_ref().map(|v| ProvenanceValidation {
        status: format!("{:?}", v.status).to_lowercase(),
        tests_passed: v.tests_passed,
        tests_failed: v.tests_failed,
        tests_total: v.tests_total,
        error_message: v.error_message.as_deref().map(|m| redactor.redact_text(m)),
        execution_time_seconds: v.execution_time_seconds,
    });
    let scans = validation_parsed.and_then(|v| v.scans);

    let adapter = run.adapter_name.as_ref().map(|name| {
        let detection = run.detection_json.as_ref();
        ProvenanceAdapter {
            name: name.clone(),
            repo_language: detection
                .and_then(|d| d.get("repo_language"))
                .and_then(serde_json::Value::as_str)
                .map(String::from),
            detected_category: detection
                .and_then(|d| d.get("category"))
                .and_then(serde_json::Value::as_str)
                .map(String::from),
            confidence: detection
                .and_then(|d| d.get("confidence"))
                .and_then(serde_json::Value::as_f64),
            evidence_lines: detection
                .and_then(|d| d.get("evidence_lines"))
                .and_then(serde_json::Value::as_array)
                .map(|lines| {
                    lines
                        .iter()
                        .filter_map(serde_json::Value::as_str)
                        .map(|l| redactor.redact_text(l))
                        .collect()
                })
                .unwrap_or_default(),
        }
    });

    let plan: Option<FixPlan> = run
        .plan_json
        .as_ref()
        .and_then(|json| serde_json::from_value(json.clone()).ok());
    let evidence = {
        let log_text: Option<String> = run
            .context_json
            .as_ref()
            .and_then(|c| c.get("log_content"))
            .and_then(|l| l.get("raw_content"))
            .and_then(serde_json::Value::as_str)
            .map(String::from)
            .or_else(|| {
                run.context_json
                    .as_ref()
                    .and_then(|c| c.get("log_summary"))
                    .and_then(serde_json::Value::as_str)
                    .map(String::from)
            });
        log_text
            .map(|text| extract_evidence(&text, plan.as_ref(), redactor))
            .unwrap_or_default()
    };

    ProvenanceArtifact {
        run_id: run.id,
        failure_id: run.event_id,
        repo: repo.to_string(),
        timestamps: ProvenanceTimestamps {
            started_at: run.created_at.to_rfc3339(),
            finished_at: chrono::Utc::now().to_rfc3339(),
        },
        status: run.status.name().to_string(),
        error_message: run.error_message.as_deref().map(|m| redactor.redact_text(m)),
        adapter,
        plan: run.plan_json.as_ref().map(|p| redactor.redact_value(p)),
        policy,
        diff_stats,
        scans,
        validation,
        evidence,
        timeline: run.timeline.clone(),
    }
}
