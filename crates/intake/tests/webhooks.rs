//! Webhook endpoint tests: signature verification, normalization filters,
//! idempotent ingestion, and response codes.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower::ServiceExt;

use adapters::AdapterRegistry;
use intake::{build_router, Dispatcher, ServerState, Settings, WebhookSecrets};
use intel::RcaEngine;
use pipeline::{
    ContextBuilder, DeterministicPlanGenerator, FixPipelineOrchestrator, Governor,
    InMemoryEventStore, InMemoryRunStore, InProcessCoordinator, OrchestratorDeps, RetryPolicy,
    StaticLogSource,
};
use safety::{FixGuardrails, PolicyEngine, SafetyPolicy};
use sandbox::{MockRuntime, ValidationOrchestrator};
use scm::{ApplyOutcome, RepoProvider, ScmError};

/// A provider that refuses every clone, keeping background workers
/// hermetic: their runs end in `plan_blocked` without touching the network.
struct NoCloneProvider;

#[async_trait]
impl RepoProvider for NoCloneProvider {
    async fn clone_repo(
        &self,
        _repo_url: &str,
        _branch: &str,
        _commit: &str,
        _depth: u32,
    ) -> Result<PathBuf, ScmError> {
        Err(ScmError::CommandFailed {
            command: "git clone".into(),
            stderr: "cloning disabled in tests".into(),
        })
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

    fn cleanup(&self, _repo_path: &Path) {}
}

fn state() -> Arc<ServerState> {
    let event_store = Arc::new(InMemoryEventStore::new());
    let run_store = Arc::new(InMemoryRunStore::new());
    let repo_provider = Arc::new(NoCloneProvider);

    let deps = OrchestratorDeps {
        event_store: Arc::clone(&event_store) as _,
        run_store: Arc::clone(&run_store) as _,
        context_builder: Arc::new(ContextBuilder::new(Arc::new(StaticLogSource {
            log_text: String::new(),
            changed_files: vec![],
            commit_message: None,
        }))),
        rca_engine: Arc::new(RcaEngine::default()),
        registry: Arc::new(AdapterRegistry::standard()),
        plan_generator: Arc::new(DeterministicPlanGenerator::new()),
        policy_engine: Arc::new(PolicyEngine::new(SafetyPolicy::standard())),
        guardrails: Arc::new(FixGuardrails::default()),
        repo_provider: Arc::clone(&repo_provider) as _,
        validator: Arc::new(
            ValidationOrchestrator::new(
                Arc::clone(&repo_provider) as _,
                Arc::new(MockRuntime::always_passing("ok")) as _,
            )
            .without_scans(),
        ),
        pr_orchestrator: Arc::new(pipeline::pr::UnconfiguredPrOrchestrator),
    };
    let orchestrator = Arc::new(FixPipelineOrchestrator::new(deps));
    let governor = Arc::new(Governor::new(
        Arc::clone(&run_store) as _,
        Arc::new(InProcessCoordinator::new()) as _,
        RetryPolicy::default(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&event_store) as _,
        Arc::clone(&run_store) as _,
        governor,
        orchestrator,
        2,
    ));

    let settings = Settings::default();
    Arc::new(ServerState {
        event_store: event_store as _,
        dispatcher,
        secrets: WebhookSecrets {
            github: Some("gh-secret".into()),
            ..WebhookSecrets::default()
        },
        settings,
    })
}

fn github_body(conclusion: &str, job_id: u64) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "action": "completed",
        "workflow_job": {
            "id": job_id,
            "run_id": 42,
            "run_attempt": 1,
            "name": "pytest",
            "conclusion": conclusion,
            "head_sha": "abc123",
            "head_branch": "main",
            "completed_at": "2025-06-01T10:00:00Z",
            "steps": []
        },
        "repository": {
            "full_name": "acme/widgets",
            "clone_url": "https://github.com/acme/widgets.git"
        },
        "sender": {"login": "developer"}
    }))
    .unwrap()
}

fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(b"gh-secret").unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn github_request(body: Vec<u8>, signature: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhooks/github")
        .header("content-type", "application/json")
        .header("x-hub-signature-256", signature)
        .header("x-github-delivery", "delivery-1")
        .body(Body::from(body))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_valid_failure_accepted_202() {
    let app = build_router(state());
    let body = github_body("failure", 7);
    let signature = sign(&body);

    let response = app.oneshot(github_request(body, &signature)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "accepted");
    assert!(json["event_id"].is_string());
    assert_eq!(json["correlation_id"], "delivery-1");
}

#[tokio::test]
async fn test_duplicate_delivery_ignored_200() {
    let state = state();
    let body = github_body("failure", 8);
    let signature = sign(&body);

    let first = build_router(Arc::clone(&state))
        .oneshot(github_request(body.clone(), &signature))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = build_router(state)
        .oneshot(github_request(body, &signature))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let json = body_json(second).await;
    assert_eq!(json["status"], "ignored");
    assert_eq!(json["message"], "Duplicate event");
}

#[tokio::test]
async fn test_bad_signature_401() {
    let app = build_router(state());
    let body = github_body("failure", 9);

    let response = app
        .oneshot(github_request(body, &format!("sha256={}", "0".repeat(64))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_invalid_json_400() {
    let app = build_router(state());
    let body = b"not json at all".to_vec();
    let signature = sign(&body);

    let response = app.oneshot(github_request(body, &signature)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_successful_job_ignored_200() {
    let app = build_router(state());
    let body = github_body("success", 10);
    let signature = sign(&body);

    let response = app.oneshot(github_request(body, &signature)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ignored");
}

#[tokio::test]
async fn test_bot_sender_ignored_200() {
    let app = build_router(state());
    let mut payload: serde_json::Value =
        serde_json::from_slice(&github_body("failure", 11)).unwrap();
    payload["sender"]["login"] = serde_json::json!("dependabot[bot]");
    let body = serde_json::to_vec(&payload).unwrap();
    let signature = sign(&body);

    let response = app.oneshot(github_request(body, &signature)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ignored");
    assert!(json["message"].as_str().unwrap().contains("bot"));
}

#[tokio::test]
async fn test_unknown_provider_404() {
    let app = build_router(state());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/travis")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = build_router(state());
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
}
