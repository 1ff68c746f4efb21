//! End-to-end pipeline tests over in-memory stores, a fixture repository
//! provider, a scripted container runtime, and a counting PR stub.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use adapters::AdapterRegistry;
use intel::RcaEngine;
use pipeline::{
    ContextBuilder, DeterministicPlanGenerator, EventStore, FixPipelineOrchestrator,
    InMemoryEventStore, InMemoryRunStore, OrchestratorDeps, PlanError, PlanGenerator, PlanRequest,
    PrError, PrOrchestrator, PrResult, RunStore, StaticLogSource,
};
use safety::{FixGuardrails, PolicyEngine, SafetyPolicy};
use sandbox::{ExecResult, MockRuntime, ScriptedExec, ValidationOrchestrator};
use schemas::{
    CiProvider, FailureContextBundle, FailureType, FixOperation, FixPlan, FixSuggestion,
    NormalizedPipelineEvent, OperationDetails, OperationType, RcaResult, RunStatus,
    ValidationResult,
};
use scm::{ApplyOutcome, RepoProvider, ScmError};

const PY_LOG: &str = "Traceback (most recent call last):\n  File \"src/main.py\", line 3, in <module>\n    import requests\nModuleNotFoundError: No module named 'requests'";

struct FixtureProvider {
    fixture: PathBuf,
    clones: AtomicUsize,
}

impl FixtureProvider {
    fn new(fixture: PathBuf) -> Self {
        Self {
            fixture,
            clones: AtomicUsize::new(0),
        }
    }

    fn clone_count(&self) -> usize {
        self.clones.load(Ordering::SeqCst)
    }
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
        self.clones.fetch_add(1, Ordering::SeqCst);
        let target = tempfile::tempdir()?.keep();
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
        Ok(ApplyOutcome {
            success: true,
            error_message: None,
        })
    }

    fn cleanup(&self, repo_path: &Path) {
        let _ = std::fs::remove_dir_all(repo_path);
    }
}

struct CountingPr {
    calls: AtomicUsize,
}

impl CountingPr {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PrOrchestrator for CountingPr {
    async fn create_pr_for_fix(
        &self,
        _fix: &FixSuggestion,
        _rca: &RcaResult,
        _validation: &ValidationResult,
        _repo_url: &str,
        _base_branch: &str,
    ) -> Result<PrResult, PrError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PrResult::created(
            &format!("https://github.com/acme/widgets/pull/{n}"),
            n as u64,
        ))
    }
}

fn python_fixture() -> PathBuf {
    let dir = tempfile::tempdir().unwrap().keep();
    std::fs::write(
        dir.join("pyproject.toml"),
        "[tool.poetry.dependencies]\npython = \"^3.11\"\nuvicorn = \"^0.30\"\n",
    )
    .unwrap();
    dir
}

fn passing_runtime() -> Arc<MockRuntime> {
    Arc::new(MockRuntime::always_passing("7 passed in 2.1s"))
}

fn event() -> NormalizedPipelineEvent {
    NormalizedPipelineEvent {
        idempotency_key: "github:acme/widgets:42:7:1".into(),
        provider: CiProvider::Github,
        pipeline_id: "42".into(),
        repo: "acme/widgets".into(),
        commit_sha: "abc123".into(),
        branch: "main".into(),
        stage: "pytest".into(),
        failure_type: FailureType::Test,
        error_message: None,
        event_timestamp: Utc::now(),
        raw_payload: serde_json::json!({
            "repository": {"clone_url": "https://github.com/acme/widgets.git"}
        }),
        correlation_id: None,
    }
}

struct Harness {
    orchestrator: FixPipelineOrchestrator,
    event_store: Arc<InMemoryEventStore>,
    run_store: Arc<InMemoryRunStore>,
    repo_provider: Arc<FixtureProvider>,
    pr: Arc<CountingPr>,
}

fn harness_with(
    policy: SafetyPolicy,
    plan_generator: Arc<dyn PlanGenerator>,
    runtime: Arc<MockRuntime>,
) -> Harness {
    let event_store = Arc::new(InMemoryEventStore::new());
    let run_store = Arc::new(InMemoryRunStore::new());
    let repo_provider = Arc::new(FixtureProvider::new(python_fixture()));
    let pr = Arc::new(CountingPr::new());

    let context_builder = Arc::new(ContextBuilder::new(Arc::new(StaticLogSource {
        log_text: PY_LOG.to_string(),
        changed_files: vec![],
        commit_message: Some("bump deps".into()),
    })));
    let validator = Arc::new(
        ValidationOrchestrator::new(Arc::clone(&repo_provider) as _, runtime as _).without_scans(),
    );

    let deps = OrchestratorDeps {
        event_store: Arc::clone(&event_store) as _,
        run_store: Arc::clone(&run_store) as _,
        context_builder,
        rca_engine: Arc::new(RcaEngine::default()),
        registry: Arc::new(AdapterRegistry::standard()),
        plan_generator,
        policy_engine: Arc::new(PolicyEngine::new(policy)),
        guardrails: Arc::new(FixGuardrails::default()),
        repo_provider: Arc::clone(&repo_provider) as _,
        validator,
        pr_orchestrator: Arc::clone(&pr) as _,
    };

    Harness {
        orchestrator: FixPipelineOrchestrator::new(deps),
        event_store,
        run_store,
        repo_provider,
        pr,
    }
}

impl Harness {
    async fn seed_run(&self) -> Uuid {
        let (stored, is_new) = self.event_store.store_event(event()).await.unwrap();
        assert!(is_new);
        let run = self
            .run_store
            .create_run(stored.id, &stored.idempotency_key)
            .await
            .unwrap();
        run.id
    }
}

#[tokio::test]
async fn test_python_missing_dependency_happy_path() {
    let harness = harness_with(
        SafetyPolicy::standard(),
        Arc::new(DeterministicPlanGenerator::new()),
        passing_runtime(),
    );
    let run_id = harness.seed_run().await;

    let outcome = harness.orchestrator.run(run_id).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.status, RunStatus::PrCreated);
    assert!(outcome.pr_url.is_some());

    let run = harness.run_store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::PrCreated);
    assert_eq!(run.adapter_name.as_deref(), Some("python"));

    // Plan: add_dependency on pyproject.toml for requests
    let plan: FixPlan = serde_json::from_value(run.plan_json.clone().unwrap()).unwrap();
    assert_eq!(plan.category, "python_missing_dependency");
    assert_eq!(plan.files, vec!["pyproject.toml"]);
    match &plan.operations[0].details {
        OperationDetails::Dependency { name, spec, .. } => {
            assert_eq!(name, "requests");
            assert_eq!(spec, "^1.0.0");
        }
        other => panic!("unexpected details: {other:?}"),
    }

    // Diff adds the requests line in lexical order (python first, then
    // requests before uvicorn)
    let diff = run.patch_diff.clone().unwrap();
    assert!(diff.contains("+requests = \"^1.0.0\""));

    // Policy allowed, safe label
    let policy = run.patch_policy_json.clone().unwrap();
    assert_eq!(policy["allowed"], true);
    assert_eq!(policy["pr_label"], "safe");

    // Validation passed, PR created exactly once
    let validation = run.validation_json.clone().unwrap();
    assert_eq!(validation["status"], "passed");
    assert_eq!(harness.pr.call_count(), 1);
    assert!(run.last_pr_url.is_some());

    // Consensus accepted and persisted
    let consensus = run.consensus_json.clone().unwrap();
    assert_eq!(consensus["state"], "accepted");

    // Provenance artifact written with a timeline
    let artifact = run.artifact_json.clone().unwrap();
    assert_eq!(artifact["status"], "pr_created");
    assert!(artifact["timeline"].as_array().unwrap().len() >= 5);
}

#[tokio::test]
async fn test_second_run_skips_pr_creation() {
    let harness = harness_with(
        SafetyPolicy::standard(),
        Arc::new(DeterministicPlanGenerator::new()),
        passing_runtime(),
    );
    let run_id = harness.seed_run().await;

    let first = harness.orchestrator.run(run_id).await.unwrap();
    assert!(first.success);
    let first_url = first.pr_url.clone().unwrap();

    let second = harness.orchestrator.run(run_id).await.unwrap();
    assert!(second.success);
    assert_eq!(second.status, RunStatus::PrCreated);
    assert_eq!(second.pr_url.as_deref(), Some(first_url.as_str()));

    // Exactly one PR across both executions
    assert_eq!(harness.pr.call_count(), 1);
    let run = harness.run_store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(
        run.last_pr_url.as_deref(),
        Some(first_url.as_str())
    );
}

struct ForcedPlan(FixPlan);

#[async_trait]
impl PlanGenerator for ForcedPlan {
    async fn generate_plan(
        &self,
        _rca: &RcaResult,
        _context: &FailureContextBundle,
        _request: &PlanRequest,
    ) -> Result<FixPlan, PlanError> {
        Ok(self.0.clone())
    }

    fn model_name(&self) -> String {
        "forced".to_string()
    }
}

#[tokio::test]
async fn test_forbidden_path_blocks_before_clone() {
    let plan = FixPlan {
        root_cause: "workflow is wrong".into(),
        category: "python_missing_dependency".into(),
        confidence: 0.9,
        files: vec![".github/workflows/ci.yml".into()],
        operations: vec![FixOperation {
            op_type: OperationType::AddDependency,
            file: ".github/workflows/ci.yml".into(),
            details: OperationDetails::Dependency {
                name: "requests".into(),
                spec: "^1.0.0".into(),
                group_id: None,
                artifact_id: None,
                plugin: false,
            },
            rationale: "broken".into(),
            evidence: vec![],
        }],
    };
    let harness = harness_with(
        SafetyPolicy::standard(),
        Arc::new(ForcedPlan(plan)),
        passing_runtime(),
    );
    let run_id = harness.seed_run().await;

    let outcome = harness.orchestrator.run(run_id).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.status, RunStatus::PlanBlocked);

    let run = harness.run_store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::PlanBlocked);
    let policy = run.plan_policy_json.clone().unwrap();
    assert_eq!(policy["allowed"], false);
    assert_eq!(policy["violations"][0]["code"], "forbidden_path");
    assert_eq!(policy["violations"][0]["severity"], "BLOCK");

    // Safety veto is reflected in the consensus record
    let consensus = run.consensus_json.clone().unwrap();
    assert_eq!(consensus["state"], "rejected_safety_veto");

    // No clone was attempted and no PR was opened
    assert_eq!(harness.repo_provider.clone_count(), 0);
    assert_eq!(harness.pr.call_count(), 0);
}

#[tokio::test]
async fn test_patch_exceeding_size_limit_blocks() {
    let mut policy = SafetyPolicy::standard();
    policy.patch_limits.max_lines_added = 0;
    let harness = harness_with(
        policy,
        Arc::new(DeterministicPlanGenerator::new()),
        passing_runtime(),
    );
    let run_id = harness.seed_run().await;

    let outcome = harness.orchestrator.run(run_id).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.status, RunStatus::PatchBlocked);

    let run = harness.run_store.get_run(run_id).await.unwrap().unwrap();
    let policy_json = run.patch_policy_json.clone().unwrap();
    let violations = policy_json["violations"].as_array().unwrap();
    assert!(violations
        .iter()
        .any(|v| v["code"] == "max_lines_added" && v["severity"] == "BLOCK"));
    assert_eq!(harness.pr.call_count(), 0);
}

#[tokio::test]
async fn test_failing_validation_ends_run() {
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
                stdout: "2 failed, 5 passed in 3.0s".into(),
                stderr: String::new(),
                timed_out: false,
            },
        },
    ]));
    let harness = harness_with(
        SafetyPolicy::standard(),
        Arc::new(DeterministicPlanGenerator::new()),
        runtime,
    );
    let run_id = harness.seed_run().await;

    let outcome = harness.orchestrator.run(run_id).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.status, RunStatus::ValidationFailed);

    let run = harness.run_store.get_run(run_id).await.unwrap().unwrap();
    let validation = run.validation_json.clone().unwrap();
    assert_eq!(validation["status"], "failed");
    assert_eq!(validation["tests_failed"], 2);
    assert_eq!(harness.pr.call_count(), 0);

    // The artifact still records the terminal state
    let artifact = run.artifact_json.clone().unwrap();
    assert_eq!(artifact["status"], "validation_failed");
}

#[tokio::test]
async fn test_duplicate_event_is_single_row() {
    let store = InMemoryEventStore::new();
    let (first, is_new) = store.store_event(event()).await.unwrap();
    assert!(is_new);
    let (second, is_new) = store.store_event(event()).await.unwrap();
    assert!(!is_new);
    assert_eq!(first.id, second.id);
}
