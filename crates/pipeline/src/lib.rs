//! The Remedy fix pipeline.
//!
//! Drives a single CI failure from a stored event to a merge-ready patch:
//! plan generation, deterministic patching, consensus, sandbox validation,
//! idempotent PR creation, and the concurrency governor around it all.

pub mod consensus;
pub mod context;
pub mod governor;
pub mod offline;
pub mod orchestrator;
pub mod patch;
pub mod plan;
pub mod pr;
pub mod provenance;
pub mod store;

pub use consensus::ConsensusCoordinator;
pub use context::{ContextBuilder, LogSource, StaticLogSource};
pub use governor::{
    compute_backoff_seconds, Coordinator, Governor, GovernorOutcome, InProcessCoordinator,
    PipelineError, RetryPolicy,
};
pub use orchestrator::{FixPipelineOrchestrator, OrchestratorDeps, RunOutcome};
pub use patch::{PatchError, PatchGenerator, PatchOutput, PatchStats};
pub use plan::{
    DeterministicPlanGenerator, LlmClient, LlmError, LlmPlanGenerator, PlanError, PlanGenerator,
    PlanRequest,
};
pub use offline::{run_pipeline_from_logs, OfflineReport};
pub use pr::{PrError, PrOrchestrator, PrResult, PrStatus};
pub use provenance::{build_provenance_artifact, extract_evidence};
pub use store::{EventStore, InMemoryEventStore, InMemoryRunStore, RunStore, StoreError};
