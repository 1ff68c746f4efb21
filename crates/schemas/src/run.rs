//! The fix-pipeline run aggregate and its state machine.
//!
//! A run owns every stage artifact as an independently serialized JSON blob
//! and is the only record the orchestrator mutates. Every state transition
//! is persisted before the side effect of the next stage begins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline run status.
///
/// ```text
/// pending -> adapter_selected -> plan_ready -> patch_ready -> validation_passed -> pr_created
///               |                   |             |                 |
///               v                   v             v                 v
///         plan_blocked        patch_blocked  patch_blocked    validation_failed
///                                                            |
///                                                            v
///                                                        pr_failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    AdapterSelected,
    PlanReady,
    PatchReady,
    ValidationPassed,
    PrCreated,
    PlanBlocked,
    PatchBlocked,
    ValidationFailed,
    PrFailed,
    Cancelled,
}

impl RunStatus {
    /// Status name as persisted.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AdapterSelected => "adapter_selected",
            Self::PlanReady => "plan_ready",
            Self::PatchReady => "patch_ready",
            Self::ValidationPassed => "validation_passed",
            Self::PrCreated => "pr_created",
            Self::PlanBlocked => "plan_blocked",
            Self::PatchBlocked => "patch_blocked",
            Self::ValidationFailed => "validation_failed",
            Self::PrFailed => "pr_failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether a run in this status can never advance again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::PrCreated
                | Self::PlanBlocked
                | Self::PatchBlocked
                | Self::ValidationFailed
                | Self::PrFailed
                | Self::Cancelled
        )
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match self {
            Self::Pending => matches!(
                next,
                Self::AdapterSelected | Self::PlanBlocked | Self::Cancelled
            ),
            Self::AdapterSelected => matches!(
                next,
                Self::PlanReady | Self::PlanBlocked | Self::Cancelled
            ),
            Self::PlanReady => matches!(
                next,
                Self::PatchReady | Self::PatchBlocked | Self::Cancelled
            ),
            Self::PatchReady => matches!(
                next,
                Self::ValidationPassed
                    | Self::ValidationFailed
                    | Self::PatchBlocked
                    | Self::Cancelled
            ),
            Self::ValidationPassed => {
                matches!(next, Self::PrCreated | Self::PrFailed | Self::Cancelled)
            }
            _ => false,
        }
    }
}

/// Outcome of one timeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Ok,
    Fail,
    Skipped,
}

/// One entry in the run's timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Step name (`ingest`, `adapter_select`, `plan`, `policy_plan`,
    /// `clone`, `patch`, `policy_patch`, `validate`, `scans`, `pr_create`)
    pub step: String,
    /// Step status
    pub status: StepStatus,
    /// When the step started
    pub started_at: Option<DateTime<Utc>>,
    /// When the step completed
    pub completed_at: Option<DateTime<Utc>>,
    /// Step duration in milliseconds
    pub duration_ms: Option<u64>,
}

impl TimelineEntry {
    /// A step that is now running.
    #[must_use]
    pub fn started(step: &str) -> Self {
        Self {
            step: step.to_string(),
            status: StepStatus::Running,
            started_at: Some(Utc::now()),
            completed_at: None,
            duration_ms: None,
        }
    }

    /// A step recorded without timing (e.g. skipped PR creation).
    #[must_use]
    pub fn untimed(step: &str, status: StepStatus) -> Self {
        Self {
            step: step.to_string(),
            status,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Close the step with the given outcome.
    pub fn finish(&mut self, status: StepStatus) {
        let completed = Utc::now();
        if let Some(started) = self.started_at {
            let ms = (completed - started).num_milliseconds().max(0);
            self.duration_ms = Some(ms.unsigned_abs());
        }
        self.completed_at = Some(completed);
        self.status = status;
    }
}

/// The central aggregate mutated by the orchestrator.
///
/// Stage artifacts are kept as independently serialized JSON blobs so each
/// stage can evolve its schema without touching the others.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixPipelineRun {
    /// Run identifier
    pub id: Uuid,
    /// Event the run processes
    pub event_id: Uuid,
    /// Stable key serializing concurrent attempts (equals the event's
    /// idempotency key)
    pub run_key: String,
    /// State machine position
    pub status: RunStatus,
    /// Governor attempt counter
    pub attempt_count: u32,
    /// Terminal block reason set by the governor (`max_attempts`)
    pub blocked_reason: Option<String>,
    /// Redacted error detail for failed/blocked runs
    pub error_message: Option<String>,
    /// Selected adapter name
    pub adapter_name: Option<String>,
    /// Adapter detection blob
    pub detection_json: Option<serde_json::Value>,
    /// Fix plan blob
    pub plan_json: Option<serde_json::Value>,
    /// Plan-level policy decision blob
    pub plan_policy_json: Option<serde_json::Value>,
    /// Generated unified diff
    pub patch_diff: Option<String>,
    /// Patch stats blob
    pub patch_stats_json: Option<serde_json::Value>,
    /// Patch-level policy decision blob
    pub patch_policy_json: Option<serde_json::Value>,
    /// Validation result blob
    pub validation_json: Option<serde_json::Value>,
    /// PR result blob
    pub pr_json: Option<serde_json::Value>,
    /// Failure context blob
    pub context_json: Option<serde_json::Value>,
    /// RCA result blob
    pub rca_json: Option<serde_json::Value>,
    /// Provenance artifact blob
    pub artifact_json: Option<serde_json::Value>,
    /// Consensus decision blob
    pub consensus_json: Option<serde_json::Value>,
    /// URL of the created PR, set exactly once
    pub last_pr_url: Option<String>,
    /// When the PR was created
    pub last_pr_created_at: Option<DateTime<Utc>>,
    /// Run timeline
    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Last row update time
    pub updated_at: DateTime<Utc>,
}

impl FixPipelineRun {
    /// A fresh `pending` run for an event.
    #[must_use]
    pub fn new(event_id: Uuid, run_key: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            event_id,
            run_key: run_key.to_string(),
            status: RunStatus::Pending,
            attempt_count: 0,
            blocked_reason: None,
            error_message: None,
            adapter_name: None,
            detection_json: None,
            plan_json: None,
            plan_policy_json: None,
            patch_diff: None,
            patch_stats_json: None,
            patch_policy_json: None,
            validation_json: None,
            pr_json: None,
            context_json: None,
            rca_json: None,
            artifact_json: None,
            consensus_json: None,
            last_pr_url: None,
            last_pr_created_at: None,
            timeline: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a PR was already created for this run (idempotent PR check).
    #[must_use]
    pub fn pr_already_created(&self) -> bool {
        if self.last_pr_url.is_some() {
            return true;
        }
        self.pr_json
            .as_ref()
            .and_then(|v| v.get("status"))
            .and_then(|v| v.as_str())
            .is_some_and(|s| s.eq_ignore_ascii_case("created"))
    }
}
