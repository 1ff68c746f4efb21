//! The fix-pipeline orchestrator.
//!
//! Drives one run through the state machine: context + RCA, adapter
//! selection, plan generation, plan policy, consensus, clone, patch
//! generation, patch policy, dry-run apply, guardrails, sandbox
//! validation, and idempotent PR creation. Every transition is persisted
//! before the next stage's side effect begins, and a redacted provenance
//! artifact is written on every exit path.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use adapters::{AdapterRegistry, Selection};
use safety::{FixGuardrails, PlanIntent, PolicyEngine, Redactor};
use sandbox::ValidationOrchestrator;
use schemas::{
    ConsensusState, CriticDecision, FailureContextBundle, FileDiff, FixPipelineRun, FixPlan,
    FixSuggestion, GuardrailStatus, IssueGraph, PipelineEvent, RcaResult, RunStatus,
    SafetyStatus, SafetyViolationNote, StepStatus, TimelineEntry, ValidationRequest,
};
use scm::RepoProvider;

use crate::consensus::ConsensusCoordinator;
use crate::context::ContextBuilder;
use crate::governor::PipelineError;
use crate::patch::PatchGenerator;
use crate::plan::{PlanGenerator, PlanRequest};
use crate::pr::{PrOrchestrator, PrStatus};
use crate::provenance::build_provenance_artifact;
use crate::store::{EventStore, RunStore};

/// Consensus thresholds.
const MIN_AGREEMENT: f64 = 0.66;
const MIN_CONFIDENCE: f64 = 0.3;
/// Shallow-clone depth for the orchestrator's working copy.
const CLONE_DEPTH: u32 = 50;

/// Everything the orchestrator needs, constructed once at process start
/// and passed in explicitly.
pub struct OrchestratorDeps {
    pub event_store: Arc<dyn EventStore>,
    pub run_store: Arc<dyn RunStore>,
    pub context_builder: Arc<ContextBuilder>,
    pub rca_engine: Arc<intel::RcaEngine>,
    pub registry: Arc<AdapterRegistry>,
    pub plan_generator: Arc<dyn PlanGenerator>,
    pub policy_engine: Arc<PolicyEngine>,
    pub guardrails: Arc<FixGuardrails>,
    pub repo_provider: Arc<dyn RepoProvider>,
    pub validator: Arc<ValidationOrchestrator>,
    pub pr_orchestrator: Arc<dyn PrOrchestrator>,
}

/// Terminal outcome of one orchestrated run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Whether the run reached `pr_created`
    pub success: bool,
    /// Final status
    pub status: RunStatus,
    /// Error detail for blocked/failed runs
    pub error: Option<String>,
    /// PR URL when one exists
    pub pr_url: Option<String>,
}

impl RunOutcome {
    fn blocked(status: RunStatus, error: &str) -> Self {
        Self {
            success: false,
            status,
            error: Some(error.to_string()),
            pr_url: None,
        }
    }
}

/// Splits a combined diff into per-file sections.
fn split_file_diffs(combined: &str) -> Vec<FileDiff> {
    let mut diffs: Vec<FileDiff> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_file: Option<String> = None;

    let flush = |file: Option<String>, lines: &[&str], out: &mut Vec<FileDiff>| {
        let Some(filename) = file else { return };
        if lines.is_empty() {
            return;
        }
        let text = lines.join("\n") + "\n";
        let mut added = 0;
        let mut removed = 0;
        for line in lines {
            if line.starts_with('+') && !line.starts_with("+++") {
                added += 1;
            } else if line.starts_with('-') && !line.starts_with("---") {
                removed += 1;
            }
        }
        out.push(FileDiff {
            filename,
            diff: text,
            lines_added: added,
            lines_removed: removed,
        });
    };

    for line in combined.lines() {
        if let Some(path) = line.strip_prefix("--- a/") {
            flush(current_file.take(), &current, &mut diffs);
            current = vec![line];
            current_file = Some(path.trim().to_string());
        } else {
            current.push(line);
        }
    }
    flush(current_file, &current, &mut diffs);
    diffs
}

/// The state machine driver.
pub struct FixPipelineOrchestrator {
    deps: OrchestratorDeps,
    consensus: ConsensusCoordinator,
    patch_generator: PatchGenerator,
    redactor: Redactor,
}

impl FixPipelineOrchestrator {
    /// Build an orchestrator.
    #[must_use]
    pub fn new(deps: OrchestratorDeps) -> Self {
        let redactor = Redactor::new(
            &deps
                .policy_engine
                .policy()
                .secrets
                .forbidden_patterns,
        );
        Self {
            deps,
            consensus: ConsensusCoordinator::new(),
            patch_generator: PatchGenerator::new(),
            redactor,
        }
    }

    /// Drive one run to a terminal state. A provenance artifact is
    /// persisted and the clone removed on every exit path.
    pub async fn run(&self, run_id: Uuid) -> Result<RunOutcome, PipelineError> {
        let mut clone_path: Option<PathBuf> = None;
        let outcome = self.run_inner(run_id, &mut clone_path).await;

        if let Some(path) = clone_path {
            self.deps.repo_provider.cleanup(&path);
        }
        self.persist_artifact(run_id).await;
        outcome
    }

    #[allow(clippy::too_many_lines)]
    async fn run_inner(
        &self,
        run_id: Uuid,
        clone_path: &mut Option<PathBuf>,
    ) -> Result<RunOutcome, PipelineError> {
        let run = self
            .load_run(run_id)
            .await?
            .ok_or(PipelineError::RunNotFound)?;
        let event = self
            .deps
            .event_store
            .get_event(run.event_id)
            .await
            .map_err(|e| PipelineError::Fatal(e.to_string()))?
            .ok_or(PipelineError::RunNotFound)?;

        let mut timeline: Vec<TimelineEntry> = run.timeline.clone();

        // Step: ingest (context + RCA)
        let mut step = TimelineEntry::started("ingest");
        let (context, rca) = self.load_or_build_context(&run, &event).await?;
        step.finish(StepStatus::Ok);
        timeline.push(step);
        self.persist_timeline(run_id, &timeline).await?;

        let log_text = context.log_text().to_string();

        // Step: adapter selection from logs + changed-file hints
        let mut step = TimelineEntry::started("adapter_select");
        let hints = context.changed_filenames();
        let Some(mut selected) = self.deps.registry.select(&log_text, &hints) else {
            step.finish(StepStatus::Fail);
            timeline.push(step);
            self.persist_timeline(run_id, &timeline).await?;
            return self
                .block(run_id, RunStatus::PlanBlocked, "No adapter matched this repository/logs")
                .await;
        };
        step.finish(StepStatus::Ok);
        timeline.push(step);
        self.persist_selection(run_id, &selected, &timeline).await?;
        self.update_run(run_id, |r| r.status = RunStatus::AdapterSelected)
            .await?;

        // Step: plan generation
        let mut step = TimelineEntry::started("plan");
        let plan_request = PlanRequest {
            category_hint: Some(selected.detection.category.clone()),
            allowed_fix_types: selected.adapter.allowed_fix_types(),
            repo_files: hints.clone(),
        };
        let plan = match self
            .deps
            .plan_generator
            .generate_plan(&rca, &context, &plan_request)
            .await
        {
            Ok(plan) => plan,
            Err(e) if e.is_transient() => {
                step.finish(StepStatus::Fail);
                timeline.push(step);
                self.persist_timeline(run_id, &timeline).await?;
                return Err(PipelineError::Retryable {
                    reason: "transient_error",
                    countdown_seconds: 0,
                });
            }
            Err(e) => {
                step.finish(StepStatus::Fail);
                timeline.push(step);
                self.persist_timeline(run_id, &timeline).await?;
                return self
                    .block(
                        run_id,
                        RunStatus::PlanBlocked,
                        &format!("Plan generation failed: {e}"),
                    )
                    .await;
            }
        };
        step.finish(StepStatus::Ok);
        timeline.push(step);

        // Adapter gates: category and operation types
        let allowed_categories = selected.adapter.allowed_categories();
        if !allowed_categories.is_empty() && !allowed_categories.contains(&plan.category) {
            return self
                .block(
                    run_id,
                    RunStatus::PlanBlocked,
                    &format!("Unsupported plan category: {}", plan.category),
                )
                .await;
        }
        let allowed_types = selected.adapter.allowed_fix_types();
        let disallowed: Vec<&str> = plan
            .operation_types()
            .into_iter()
            .filter(|t| !allowed_types.contains(t))
            .map(|t| t.name())
            .collect();
        if !disallowed.is_empty() {
            return self
                .block(
                    run_id,
                    RunStatus::PlanBlocked,
                    &format!("Plan used disallowed fix types: {}", disallowed.join(", ")),
                )
                .await;
        }
        if plan.operations.is_empty() {
            return self
                .block(run_id, RunStatus::PlanBlocked, "Plan contains no operations")
                .await;
        }

        // Step: plan policy
        let mut step = TimelineEntry::started("policy_plan");
        let plan_decision = self.deps.policy_engine.evaluate_plan(&PlanIntent {
            target_files: plan.files.clone(),
            category: plan.category.clone(),
            operation_types: plan
                .operation_types()
                .into_iter()
                .map(|t| t.name().to_string())
                .collect(),
        });
        step.finish(if plan_decision.allowed {
            StepStatus::Ok
        } else {
            StepStatus::Fail
        });
        timeline.push(step);

        // Consensus across planner/critic/safety candidates
        let mut issue_files = rca
            .affected_files
            .iter()
            .map(|f| f.filename.clone())
            .collect::<Vec<_>>();
        issue_files.extend(plan.files.iter().cloned());
        issue_files.sort();
        issue_files.dedup();
        let consensus = self.consensus.resolve(
            &IssueGraph {
                affected_files: issue_files,
            },
            &plan,
            &CriticDecision::permissive(),
            &plan_decision,
            MIN_AGREEMENT,
            MIN_CONFIDENCE,
        );

        let plan_json = serde_json::to_value(&plan).ok();
        let plan_policy_json = serde_json::to_value(&plan_decision).ok();
        let consensus_json = serde_json::to_value(&consensus).ok();
        let timeline_snapshot = timeline.clone();
        self.update_run(run_id, move |r| {
            r.plan_json = plan_json;
            r.plan_policy_json = plan_policy_json;
            r.consensus_json = consensus_json;
            r.timeline = timeline_snapshot;
        })
        .await?;

        if !plan_decision.allowed {
            debug_assert_eq!(consensus.state, ConsensusState::RejectedSafetyVeto);
            return self
                .block(run_id, RunStatus::PlanBlocked, "Plan blocked by safety policy")
                .await;
        }
        if !consensus.is_accepted() {
            return self
                .block(
                    run_id,
                    RunStatus::PlanBlocked,
                    &format!("Consensus rejected the plan: {:?}", consensus.state),
                )
                .await;
        }

        self.update_run(run_id, |r| r.status = RunStatus::PlanReady).await?;

        // Clone the repository
        let Some(repo_url) = event.repo_url() else {
            return self
                .block(
                    run_id,
                    RunStatus::PlanBlocked,
                    "Unsupported repository URL for cloning",
                )
                .await;
        };
        let mut step = TimelineEntry::started("clone");
        let repo_path = match self
            .deps
            .repo_provider
            .clone_repo(&repo_url, &event.branch, &event.commit_sha, CLONE_DEPTH)
            .await
        {
            Ok(path) => path,
            Err(e) if e.is_transient() => {
                step.finish(StepStatus::Fail);
                timeline.push(step);
                self.persist_timeline(run_id, &timeline).await?;
                return Err(PipelineError::Retryable {
                    reason: "transient_error",
                    countdown_seconds: 0,
                });
            }
            Err(e) => {
                step.finish(StepStatus::Fail);
                timeline.push(step);
                self.persist_timeline(run_id, &timeline).await?;
                return self
                    .block(run_id, RunStatus::PlanBlocked, &format!("Clone failed: {e}"))
                    .await;
            }
        };
        *clone_path = Some(repo_path.clone());
        step.finish(StepStatus::Ok);
        timeline.push(step);
        self.persist_timeline(run_id, &timeline).await?;

        // Re-run adapter selection with the full file listing; a different
        // winner supersedes the first pick.
        let repo_files = scm::list_repo_files(&repo_path);
        if let Some(reselected) = self.deps.registry.select(&log_text, &repo_files) {
            if reselected.adapter.name() != selected.adapter.name() {
                info!(
                    from = selected.adapter.name(),
                    to = reselected.adapter.name(),
                    "Adapter superseded after clone"
                );
                selected = reselected;
                self.persist_selection(run_id, &selected, &timeline).await?;
            }
        }

        // Step: patch generation
        let mut step = TimelineEntry::started("patch");
        let patch = match self.patch_generator.generate(&repo_path, &plan) {
            Ok(patch) => patch,
            Err(e) => {
                step.finish(StepStatus::Fail);
                timeline.push(step);
                self.persist_timeline(run_id, &timeline).await?;
                return self
                    .block(
                        run_id,
                        RunStatus::PatchBlocked,
                        &format!("Patch generation failed: {e}"),
                    )
                    .await;
            }
        };
        step.finish(StepStatus::Ok);
        timeline.push(step);

        if patch.diff_text.trim().is_empty() {
            return self
                .block(run_id, RunStatus::PatchBlocked, "Patch produced no changes")
                .await;
        }

        // Defense in depth: the diff must stay inside plan.files
        let parsed = match safety::parse_unified_diff(&patch.diff_text) {
            Ok(parsed) => parsed,
            Err(e) => {
                return self
                    .block(
                        run_id,
                        RunStatus::PatchBlocked,
                        &format!("Generated diff is malformed: {e}"),
                    )
                    .await;
            }
        };
        let outside: Vec<String> = parsed
            .paths()
            .into_iter()
            .filter(|p| !plan.files.iter().any(|f| f == p))
            .collect();
        if !outside.is_empty() {
            let patch_diff = patch.diff_text.clone();
            let stats_json = serde_json::to_value(&patch.stats).ok();
            self.update_run(run_id, move |r| {
                r.patch_diff = Some(patch_diff);
                r.patch_stats_json = stats_json;
            })
            .await?;
            return self
                .block(
                    run_id,
                    RunStatus::PatchBlocked,
                    "Patch touched files outside plan.files",
                )
                .await;
        }

        // Step: patch policy
        let mut step = TimelineEntry::started("policy_patch");
        let patch_decision = self.deps.policy_engine.evaluate_patch(&patch.diff_text);
        step.finish(if patch_decision.allowed {
            StepStatus::Ok
        } else {
            StepStatus::Fail
        });
        timeline.push(step);

        let patch_diff = patch.diff_text.clone();
        let stats_json = serde_json::to_value(&patch.stats).ok();
        let policy_json = serde_json::to_value(&patch_decision).ok();
        let timeline_snapshot = timeline.clone();
        self.update_run(run_id, move |r| {
            r.patch_diff = Some(patch_diff);
            r.patch_stats_json = stats_json;
            r.patch_policy_json = policy_json;
            r.timeline = timeline_snapshot;
        })
        .await?;

        if !patch_decision.allowed {
            return self
                .block(run_id, RunStatus::PatchBlocked, "Patch blocked by safety policy")
                .await;
        }

        // Dry-run apply before anything touches the tree
        let check = self
            .deps
            .repo_provider
            .apply_patch(&repo_path, &patch.diff_text, true)
            .await
            .map_err(|e| PipelineError::Fatal(e.to_string()))?;
        if !check.success {
            return self
                .block(
                    run_id,
                    RunStatus::PatchBlocked,
                    &format!(
                        "Patch does not apply cleanly: {}",
                        check.error_message.unwrap_or_default()
                    ),
                )
                .await;
        }

        // Guardrails on the assembled fix
        let mut fix = self.build_fix_suggestion(&run, &event, &plan, &patch.diff_text, &patch_decision);
        let guardrail_status: GuardrailStatus = self.deps.guardrails.validate(&fix);
        fix.guardrail_status = guardrail_status.clone();
        if !guardrail_status.passed {
            return self
                .block(run_id, RunStatus::PatchBlocked, "Patch blocked by guardrails")
                .await;
        }

        self.update_run(run_id, |r| r.status = RunStatus::PatchReady).await?;

        // Step: sandbox validation
        let mut step = TimelineEntry::started("validate");
        let request = ValidationRequest {
            fix_id: run_id.to_string(),
            event_id: event.id,
            repo_url: repo_url.clone(),
            branch: event.branch.clone(),
            commit_sha: event.commit_sha.clone(),
            diff: patch.diff_text.clone(),
            adapter_name: selected.adapter.name().to_string(),
            validation_steps: selected.adapter.build_validation_steps(&repo_path),
            allow_network: selected.adapter.needs_network(),
        };
        let validation = match self.deps.validator.validate(&request).await {
            Ok(validation) => validation,
            Err(e) if e.is_transient() => {
                step.finish(StepStatus::Fail);
                timeline.push(step);
                self.persist_timeline(run_id, &timeline).await?;
                return Err(PipelineError::Retryable {
                    reason: "transient_error",
                    countdown_seconds: 0,
                });
            }
            Err(e) => {
                step.finish(StepStatus::Fail);
                timeline.push(step);
                self.persist_timeline(run_id, &timeline).await?;
                return self
                    .block(
                        run_id,
                        RunStatus::ValidationFailed,
                        &format!("Validation aborted: {e}"),
                    )
                    .await;
            }
        };
        let successful = validation.is_successful();
        step.finish(if successful { StepStatus::Ok } else { StepStatus::Fail });
        timeline.push(step);
        timeline.push(TimelineEntry::untimed(
            "scans",
            match &validation.scans {
                Some(scans) if scans.has_blocking_finding() => StepStatus::Fail,
                Some(_) => StepStatus::Ok,
                None => StepStatus::Skipped,
            },
        ));

        let validation_json = serde_json::to_value(&validation).ok();
        let timeline_snapshot = timeline.clone();
        self.update_run(run_id, move |r| {
            r.validation_json = validation_json;
            r.timeline = timeline_snapshot;
        })
        .await?;

        if !successful {
            let message = validation
                .error_message
                .clone()
                .unwrap_or_else(|| "Validation failed".to_string());
            return self
                .block(run_id, RunStatus::ValidationFailed, &message)
                .await;
        }

        self.update_run(run_id, |r| r.status = RunStatus::ValidationPassed)
            .await?;

        // Idempotent PR creation: a second execution of the same run never
        // opens a second pull request.
        let latest = self
            .load_run(run_id)
            .await?
            .ok_or(PipelineError::RunNotFound)?;
        if latest.pr_already_created() {
            info!(run_id = %run_id, "PR already created; skipping");
            timeline.push(TimelineEntry::untimed("pr_create", StepStatus::Skipped));
            let timeline_snapshot = timeline.clone();
            self.update_run(run_id, move |r| {
                r.status = RunStatus::PrCreated;
                r.timeline = timeline_snapshot;
            })
            .await?;
            return Ok(RunOutcome {
                success: true,
                status: RunStatus::PrCreated,
                error: None,
                pr_url: latest.last_pr_url,
            });
        }

        let mut step = TimelineEntry::started("pr_create");
        let pr_result = self
            .deps
            .pr_orchestrator
            .create_pr_for_fix(&fix, &rca, &validation, &repo_url, &event.branch)
            .await;

        match pr_result {
            Ok(result) => {
                let created = result.status == PrStatus::Created;
                step.finish(if created { StepStatus::Ok } else { StepStatus::Fail });
                timeline.push(step);

                let pr_json = serde_json::to_value(&result).ok();
                let pr_url = result.pr_url.clone();
                let pr_created_at = result.created_at;
                let timeline_snapshot = timeline.clone();
                self.update_run(run_id, move |r| {
                    r.pr_json = pr_json;
                    r.last_pr_url = pr_url;
                    r.last_pr_created_at = pr_created_at;
                    r.timeline = timeline_snapshot;
                })
                .await?;

                if created {
                    self.update_run(run_id, |r| r.status = RunStatus::PrCreated).await?;
                    Ok(RunOutcome {
                        success: true,
                        status: RunStatus::PrCreated,
                        error: None,
                        pr_url: result.pr_url,
                    })
                } else {
                    self.block(
                        run_id,
                        RunStatus::PrFailed,
                        &result
                            .error_message
                            .unwrap_or_else(|| "PR creation failed".to_string()),
                    )
                    .await
                }
            }
            Err(e) if e.is_transient() => {
                step.finish(StepStatus::Fail);
                timeline.push(step);
                self.persist_timeline(run_id, &timeline).await?;
                Err(PipelineError::Retryable {
                    reason: "transient_error",
                    countdown_seconds: 0,
                })
            }
            Err(e) => {
                step.finish(StepStatus::Fail);
                timeline.push(step);
                self.persist_timeline(run_id, &timeline).await?;
                self.block(run_id, RunStatus::PrFailed, &e.to_string()).await
            }
        }
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<FixPipelineRun>, PipelineError> {
        self.deps
            .run_store
            .get_run(run_id)
            .await
            .map_err(|e| PipelineError::Fatal(e.to_string()))
    }

    async fn update_run<F>(&self, run_id: Uuid, mutate: F) -> Result<FixPipelineRun, PipelineError>
    where
        F: FnOnce(&mut FixPipelineRun) + Send + 'static,
    {
        self.deps
            .run_store
            .update_run(run_id, Box::new(mutate))
            .await
            .map_err(|e| PipelineError::Fatal(e.to_string()))
    }

    async fn persist_timeline(
        &self,
        run_id: Uuid,
        timeline: &[TimelineEntry],
    ) -> Result<(), PipelineError> {
        let snapshot = timeline.to_vec();
        self.update_run(run_id, move |r| r.timeline = snapshot).await?;
        Ok(())
    }

    async fn persist_selection(
        &self,
        run_id: Uuid,
        selected: &Selection,
        timeline: &[TimelineEntry],
    ) -> Result<(), PipelineError> {
        let adapter_name = selected.adapter.name().to_string();
        let detection_json = serde_json::to_value(&selected.detection).ok();
        let snapshot = timeline.to_vec();
        self.update_run(run_id, move |r| {
            r.adapter_name = Some(adapter_name);
            r.detection_json = detection_json;
            r.timeline = snapshot;
        })
        .await?;
        Ok(())
    }

    async fn block(
        &self,
        run_id: Uuid,
        status: RunStatus,
        message: &str,
    ) -> Result<RunOutcome, PipelineError> {
        warn!(run_id = %run_id, status = status.name(), message, "Run blocked");
        let redacted = self.redactor.redact_text(message);
        let persisted = redacted.clone();
        self.update_run(run_id, move |r| {
            r.status = status;
            r.error_message = Some(persisted);
        })
        .await?;
        Ok(RunOutcome::blocked(status, &redacted))
    }

    async fn load_or_build_context(
        &self,
        run: &FixPipelineRun,
        event: &PipelineEvent,
    ) -> Result<(FailureContextBundle, RcaResult), PipelineError> {
        if let (Some(context_json), Some(rca_json)) = (&run.context_json, &run.rca_json) {
            if let (Ok(context), Ok(rca)) = (
                serde_json::from_value(context_json.clone()),
                serde_json::from_value(rca_json.clone()),
            ) {
                return Ok((context, rca));
            }
        }

        let context = self.deps.context_builder.build_context(event).await;
        let rca = self.deps.rca_engine.analyze(&context);

        let context_json = serde_json::to_value(&context).ok();
        let rca_json = serde_json::to_value(&rca).ok();
        self.update_run(run.id, move |r| {
            r.context_json = context_json;
            r.rca_json = rca_json;
        })
        .await?;
        Ok((context, rca))
    }

    fn build_fix_suggestion(
        &self,
        run: &FixPipelineRun,
        event: &PipelineEvent,
        plan: &FixPlan,
        diff_text: &str,
        patch_decision: &safety::PolicyDecision,
    ) -> FixSuggestion {
        let diffs = split_file_diffs(diff_text);
        let total_added = diffs.iter().map(|d| d.lines_added).sum();
        let total_removed = diffs.iter().map(|d| d.lines_removed).sum();

        let safety_status = SafetyStatus {
            allowed: patch_decision.allowed,
            pr_label: patch_decision.pr_label.as_str().to_string(),
            danger_score: patch_decision.danger_score,
            violations: patch_decision
                .violations
                .iter()
                .map(|v| SafetyViolationNote {
                    code: v.code.clone(),
                    severity: format!("{:?}", v.severity).to_uppercase(),
                    message: v.message.clone(),
                    file_path: v.file_path.clone(),
                })
                .collect(),
            danger_reasons: patch_decision
                .danger_reasons
                .iter()
                .map(|r| r.message.clone())
                .collect(),
        };

        let summary: String = format!("{}: {}", plan.category, plan.root_cause)
            .chars()
            .take(200)
            .collect();
        let explanation = std::iter::once(plan.root_cause.clone())
            .chain(plan.operations.iter().map(|op| {
                format!("{} {}: {}", op.op_type.name(), op.file, op.rationale)
            }))
            .collect::<Vec<_>>()
            .join("\n");

        FixSuggestion {
            event_id: event.id,
            fix_id: run.id.to_string(),
            diffs,
            explanation,
            summary,
            target_files: plan.files.clone(),
            confidence: plan.confidence,
            total_lines_added: total_added,
            total_lines_removed: total_removed,
            guardrail_status: GuardrailStatus::passed(),
            safety_status,
            model_used: self.deps.plan_generator.model_name(),
        }
    }

    async fn persist_artifact(&self, run_id: Uuid) {
        let Ok(Some(run)) = self.load_run(run_id).await else {
            return;
        };
        let repo = match self.deps.event_store.get_event(run.event_id).await {
            Ok(Some(event)) => event.repo,
            _ => "unknown".to_string(),
        };
        let artifact = build_provenance_artifact(&run, &repo, &self.redactor);
        let artifact_json = serde_json::to_value(&artifact).ok();
        let result = self
            .update_run(run_id, move |r| r.artifact_json = artifact_json)
            .await;
        if let Err(e) = result {
            error!(run_id = %run_id, error = %e, "Failed to persist provenance artifact");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_file_diffs() {
        let combined = "\
--- a/go.mod
+++ b/go.mod
@@ -1,2 +1,3 @@
 require (
+\tgithub.com/acme/foo v1.0.0
 )
--- a/go.sum
+++ b/go.sum
@@ -1 +1,2 @@
 existing
+line
";
        let diffs = split_file_diffs(combined);
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].filename, "go.mod");
        assert_eq!(diffs[0].lines_added, 1);
        assert_eq!(diffs[1].filename, "go.sum");
    }

    #[test]
    fn test_run_outcome_blocked() {
        let outcome = RunOutcome::blocked(RunStatus::PlanBlocked, "no adapter");
        assert!(!outcome.success);
        assert_eq!(outcome.status, RunStatus::PlanBlocked);
        assert_eq!(outcome.error.as_deref(), Some("no adapter"));
    }
}
