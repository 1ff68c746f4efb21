//! Safety subsystem for the Remedy fix pipeline.
//!
//! - [`diff`]: the unified-diff parser, the single source of truth for diff
//!   measurement used by the policy engine and the patch generator
//! - [`policy`]: the `SafetyPolicy` model and the policy engine evaluating
//!   plan intents and patches
//! - [`danger`]: additive, policy-weighted danger scoring
//! - [`guardrails`]: fix-level checks (scope, size, secrets, destructive
//!   commands, diff syntax)
//! - [`redact`]: secret masking applied to everything that gets persisted
//! - [`loader`]: YAML policy files

pub mod danger;
pub mod diff;
pub mod guardrails;
pub mod loader;
pub mod policy;
pub mod redact;

pub use danger::DangerReason;
pub use diff::{normalize_path, parse_unified_diff, DiffError, ParsedDiff, ParsedDiffFile};
pub use guardrails::{FixGuardrails, GuardrailConfig};
pub use loader::{load_policy_from_file, PolicyLoadError};
pub use policy::{
    PlanIntent, PolicyDecision, PolicyEngine, PolicySeverity, PolicyViolation, PrLabel,
    SafetyPolicy,
};
pub use redact::Redactor;
