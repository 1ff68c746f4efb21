//! Remedy server binary.
//!
//! `remedy serve` runs the webhook server with the full pipeline behind
//! it; `remedy offline` drives the deterministic pipeline over a log file
//! and a fixture directory without any network or container dependency.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use adapters::AdapterRegistry;
use intake::{build_router, Dispatcher, ServerState, Settings};
use intel::RcaEngine;
use pipeline::{
    ContextBuilder, DeterministicPlanGenerator, FixPipelineOrchestrator, Governor,
    InMemoryEventStore, InMemoryRunStore, InProcessCoordinator, OrchestratorDeps,
};
use safety::{load_policy_from_file, FixGuardrails, PolicyEngine, SafetyPolicy};
use sandbox::{DockerRuntime, ValidationOrchestrator};
use scm::git::GitWorkspace;
use scm::github::GithubClient;

/// Autonomous CI/CD failure remediation service
#[derive(Parser)]
#[command(name = "remedy")]
#[command(about = "Autonomous CI/CD failure remediation service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server and pipeline workers
    Serve {
        /// Path to the settings YAML
        #[arg(long, env = "REMEDY_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Run the deterministic pipeline over a log file and fixture dir
    Offline {
        /// Case identifier used in the report
        #[arg(long, default_value = "offline")]
        case_id: String,
        /// Path to the CI log file
        #[arg(long)]
        log_file: PathBuf,
        /// Repository fixture directory to patch against
        #[arg(long)]
        fixture_dir: Option<PathBuf>,
        /// Safety policy YAML (standard policy when omitted)
        #[arg(long)]
        policy: Option<PathBuf>,
    },
}

fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_policy(path: Option<&PathBuf>) -> Result<SafetyPolicy> {
    match path {
        Some(path) => load_policy_from_file(path)
            .with_context(|| format!("failed to load policy from {}", path.display())),
        None => Ok(SafetyPolicy::standard()),
    }
}

async fn serve(config: Option<PathBuf>) -> Result<()> {
    let settings = Settings::load(config.as_deref()).context("failed to load settings")?;
    let policy = load_policy(settings.policy_path.as_ref())?;

    // Explicit construction at the process entry point; no global state.
    let policy_engine = Arc::new(PolicyEngine::new(policy));
    let event_store = Arc::new(InMemoryEventStore::new());
    let run_store = Arc::new(InMemoryRunStore::new());
    let coordinator = Arc::new(InProcessCoordinator::new());
    let repo_provider = Arc::new(GitWorkspace::default());
    let runtime = Arc::new(DockerRuntime);
    let github = GithubClient::new(settings.github_token.as_deref())
        .context("failed to build the GitHub client")?;
    let log_source = Arc::new(intake::sources::GithubLogSource::new(github));

    let deps = OrchestratorDeps {
        event_store: Arc::clone(&event_store) as _,
        run_store: Arc::clone(&run_store) as _,
        context_builder: Arc::new(ContextBuilder::new(log_source)),
        rca_engine: Arc::new(RcaEngine::default()),
        registry: Arc::new(AdapterRegistry::standard()),
        plan_generator: Arc::new(DeterministicPlanGenerator::new()),
        policy_engine: Arc::clone(&policy_engine),
        guardrails: Arc::new(FixGuardrails::default()),
        repo_provider: Arc::clone(&repo_provider) as _,
        validator: Arc::new(ValidationOrchestrator::new(
            Arc::clone(&repo_provider) as _,
            runtime as _,
        )),
        pr_orchestrator: Arc::new(pipeline::pr::UnconfiguredPrOrchestrator),
    };
    let orchestrator = Arc::new(FixPipelineOrchestrator::new(deps));
    let governor = Arc::new(Governor::new(
        Arc::clone(&run_store) as _,
        coordinator as _,
        settings.retry.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&event_store) as _,
        Arc::clone(&run_store) as _,
        governor,
        orchestrator,
        settings.worker_concurrency,
    ));

    let addr = settings.listen_addr.clone();
    let state = Arc::new(ServerState {
        event_store: event_store as _,
        dispatcher,
        secrets: settings.secrets.clone(),
        settings,
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Remedy webhook server listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn offline(
    case_id: String,
    log_file: PathBuf,
    fixture_dir: Option<PathBuf>,
    policy: Option<PathBuf>,
) -> Result<()> {
    let log_text = std::fs::read_to_string(&log_file)
        .with_context(|| format!("failed to read {}", log_file.display()))?;
    let policy = load_policy(policy.as_ref())?;
    let engine = PolicyEngine::new(policy);

    let report = pipeline::run_pipeline_from_logs(
        &log_text,
        &case_id,
        fixture_dir.as_deref(),
        &engine,
    )
    .await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Serve { config } => serve(config).await,
        Commands::Offline {
            case_id,
            log_file,
            fixture_dir,
            policy,
        } => offline(case_id, log_file, fixture_dir, policy).await,
    }
}
