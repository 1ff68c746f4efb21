//! Shared data model for the Remedy fix pipeline.
//!
//! Every type that crosses a crate boundary lives here:
//! - Normalized CI events and their lifecycle
//! - Failure context bundles assembled from logs and commit metadata
//! - Classification / root-cause analysis results
//! - Fix plans with typed operations
//! - Sandbox validation requests and results
//! - Consensus candidates and decisions
//! - The pipeline run aggregate and its state machine
//! - The redacted provenance artifact

pub mod consensus;
pub mod context;
pub mod event;
pub mod fix;
pub mod intelligence;
pub mod plan;
pub mod provenance;
pub mod run;
pub mod validation;

pub use consensus::{
    AgentOutput, ConsensusDecision, ConsensusRejection, ConsensusState, CriticDecision,
    IssueGraph, ProposedAction, ReasoningEdge,
};
pub use context::{
    BuildError, ChangedFile, ErrorInfo, FailureContextBundle, LogContent, LogLanguage, Severity,
    StackFrame, StackTrace, StepTiming, TestFailure,
};
pub use event::{CiProvider, EventStatus, FailureType, NormalizedPipelineEvent, PipelineEvent};
pub use fix::{
    FileDiff, FixSuggestion, GuardrailSeverity, GuardrailStatus, GuardrailViolation, SafetyStatus,
    SafetyViolationNote,
};
pub use intelligence::{
    AffectedFile, Classification, FailureCategory, RcaHypothesis, RcaResult, SimilarIncident,
};
pub use plan::{
    BaseImagePin, FixOperation, FixPlan, OperationDetails, OperationType, PlanContractError,
};
pub use provenance::{
    EvidenceLine, ProvenanceAdapter, ProvenanceArtifact, ProvenanceDiffStats, ProvenancePolicy,
    ProvenanceTimestamps, ProvenanceValidation,
};
pub use run::{FixPipelineRun, RunStatus, StepStatus, TimelineEntry};
pub use validation::{
    SbomInfo, ScanResult, ScanStatus, ScanSummary, ValidationRequest, ValidationResult,
    ValidationStatus, ValidationStep,
};
