//! Offline one-shot pipeline.
//!
//! Drives adapter selection, classification, deterministic planning, policy
//! evaluation, and patch generation from a log file plus a fixture
//! directory, with no network, container, or store involved. This is the
//! `remedy offline` subcommand and the backbone of the evaluation fixtures.

use chrono::Utc;
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

use adapters::{select_adapter, Detection};
use intel::{LogParser, RcaEngine};
use safety::{ParsedDiff, PlanIntent, PolicyDecision, PolicyEngine};
use schemas::{FailureContextBundle, FixPlan, LogContent, RcaResult};

use crate::patch::{PatchGenerator, PatchStats};
use crate::plan::{DeterministicPlanGenerator, PlanGenerator, PlanRequest};

/// Everything one offline run produced.
#[derive(Debug, Serialize)]
pub struct OfflineReport {
    /// Case identifier supplied by the caller
    pub case_id: String,
    /// Winning adapter, if any
    pub adapter: Option<String>,
    /// Its detection output
    pub detection: Option<Detection>,
    /// RCA output
    pub rca: RcaResult,
    /// Generated plan, when a deterministic category matched
    pub plan: Option<FixPlan>,
    /// Plan-level policy decision
    pub plan_decision: Option<PolicyDecision>,
    /// Generated diff (empty when planning or policy stopped the run)
    pub patch_diff: String,
    /// Patch stats, when a diff was generated
    pub patch_stats: Option<PatchStats>,
    /// Patch-level policy decision
    pub patch_decision: Option<PolicyDecision>,
    /// Patch generation error, if one occurred
    pub patch_error: Option<String>,
    /// Whether the diff touched files outside the plan
    pub patch_touches_outside_plan: bool,
    /// Wall-clock time in milliseconds
    pub time_ms: u64,
}

fn context_from_logs(case_id: &str, log_text: &str) -> FailureContextBundle {
    let parsed = LogParser::new().parse(log_text);
    FailureContextBundle {
        event_id: Uuid::new_v4(),
        repo: "offline/fixture".to_string(),
        commit_sha: "0".repeat(40),
        branch: "main".to_string(),
        pipeline_id: case_id.to_string(),
        job_name: Some(case_id.to_string()),
        log_content: Some(LogContent::capped(log_text, usize::MAX, Some(case_id.to_string()))),
        log_summary: Some(parsed.summary),
        errors: parsed.errors,
        stack_traces: parsed.stack_traces,
        test_failures: parsed.test_failures,
        build_errors: parsed.build_errors,
        changed_files: vec![],
        commit_message: None,
        execution_time_seconds: None,
        step_timings: vec![],
        built_at: Utc::now(),
    }
}

/// Run the offline pipeline for one log + fixture pair.
pub async fn run_pipeline_from_logs(
    log_text: &str,
    case_id: &str,
    repo_fixture_dir: Option<&Path>,
    policy_engine: &PolicyEngine,
) -> OfflineReport {
    let started = std::time::Instant::now();

    let context = context_from_logs(case_id, log_text);
    let repo_files: Vec<String> = repo_fixture_dir
        .map(scm::list_repo_files)
        .unwrap_or_default();
    let selected = select_adapter(log_text, &repo_files);
    let rca = RcaEngine::default().analyze(&context);

    let mut plan: Option<FixPlan> = None;
    let mut plan_decision: Option<PolicyDecision> = None;
    let mut patch_diff = String::new();
    let mut patch_stats: Option<PatchStats> = None;
    let mut patch_decision: Option<PolicyDecision> = None;
    let mut patch_error: Option<String> = None;
    let mut touches_outside = false;

    if let Some(selection) = &selected {
        let request = PlanRequest {
            category_hint: Some(selection.detection.category.clone()),
            allowed_fix_types: selection.adapter.allowed_fix_types(),
            repo_files: repo_files.clone(),
        };
        match DeterministicPlanGenerator::new()
            .generate_plan(&rca, &context, &request)
            .await
        {
            Ok(generated) => {
                let decision = policy_engine.evaluate_plan(&PlanIntent {
                    target_files: generated.files.clone(),
                    category: generated.category.clone(),
                    operation_types: generated
                        .operation_types()
                        .into_iter()
                        .map(|t| t.name().to_string())
                        .collect(),
                });

                if decision.allowed {
                    if let Some(fixture) = repo_fixture_dir {
                        match PatchGenerator::new().generate(fixture, &generated) {
                            Ok(patch) => {
                                if !patch.diff_text.trim().is_empty() {
                                    let parsed: Option<ParsedDiff> =
                                        safety::parse_unified_diff(&patch.diff_text).ok();
                                    touches_outside = parsed.is_some_and(|p| {
                                        p.paths()
                                            .iter()
                                            .any(|path| !generated.files.contains(path))
                                    });
                                    patch_decision =
                                        Some(policy_engine.evaluate_patch(&patch.diff_text));
                                }
                                patch_diff = patch.diff_text;
                                patch_stats = Some(patch.stats);
                            }
                            Err(e) => patch_error = Some(e.to_string()),
                        }
                    }
                }
                plan = Some(generated);
                plan_decision = Some(decision);
            }
            Err(e) => patch_error = Some(e.to_string()),
        }
    }

    OfflineReport {
        case_id: case_id.to_string(),
        adapter: selected.as_ref().map(|s| s.adapter.name().to_string()),
        detection: selected.map(|s| s.detection),
        rca,
        plan,
        plan_decision,
        patch_diff,
        patch_stats,
        patch_decision,
        patch_error,
        patch_touches_outside_plan: touches_outside,
        time_ms: started.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safety::SafetyPolicy;

    #[tokio::test]
    async fn test_offline_python_missing_dependency() {
        let fixture = tempfile::tempdir().unwrap();
        std::fs::write(
            fixture.path().join("pyproject.toml"),
            "[tool.poetry.dependencies]\npython = \"^3.11\"\n",
        )
        .unwrap();

        let engine = PolicyEngine::new(SafetyPolicy::standard());
        let report = run_pipeline_from_logs(
            "ModuleNotFoundError: No module named 'requests'",
            "py-missing-dep",
            Some(fixture.path()),
            &engine,
        )
        .await;

        assert_eq!(report.adapter.as_deref(), Some("python"));
        let plan = report.plan.as_ref().unwrap();
        assert_eq!(plan.category, "python_missing_dependency");
        assert!(report.plan_decision.as_ref().unwrap().allowed);
        assert!(report.patch_diff.contains("+requests = \"^1.0.0\""));
        assert!(report.patch_decision.as_ref().unwrap().allowed);
        assert!(!report.patch_touches_outside_plan);
        assert!(report.patch_error.is_none());
    }

    #[tokio::test]
    async fn test_offline_without_fixture_stops_at_policy() {
        let engine = PolicyEngine::new(SafetyPolicy::standard());
        let report = run_pipeline_from_logs(
            "ModuleNotFoundError: No module named 'requests'",
            "no-fixture",
            None,
            &engine,
        )
        .await;
        assert!(report.plan.is_some());
        assert!(report.patch_diff.is_empty());
        assert!(report.patch_decision.is_none());
    }

    #[tokio::test]
    async fn test_offline_unmatched_log_has_no_plan() {
        let engine = PolicyEngine::new(SafetyPolicy::standard());
        let report =
            run_pipeline_from_logs("everything is fine here", "clean", None, &engine).await;
        assert!(report.adapter.is_none());
        assert!(report.plan.is_none());
    }
}
