//! Fix plans: declarative descriptions of an intended change as a set of
//! typed operations over named files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// The global fix-operation vocabulary. Adapters gate which subset the
/// orchestrator may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    AddDependency,
    PinDependency,
    UpdateConfig,
    RemoveUnused,
}

impl OperationType {
    /// Operation name as used in plans and policy intents.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::AddDependency => "add_dependency",
            Self::PinDependency => "pin_dependency",
            Self::UpdateConfig => "update_config",
            Self::RemoveUnused => "remove_unused",
        }
    }
}

/// A `FROM` pin for a Dockerfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseImagePin {
    /// Image name without tag (e.g. `ubuntu`)
    pub image: String,
    /// Tag to pin (e.g. `22.04`)
    pub tag: String,
}

/// Typed payload of a fix operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationDetails {
    /// Upsert a dependency in a manifest file.
    Dependency {
        /// Package/module name (`groupId:artifactId` accepted for Maven)
        name: String,
        /// Version spec in the target file's native syntax
        spec: String,
        /// Maven group id, when `name` does not carry it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<String>,
        /// Maven artifact id, when `name` does not carry it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artifact_id: Option<String>,
        /// Target a Maven `<plugin>` block instead of `<dependency>`
        #[serde(default)]
        plugin: bool,
    },
    /// Structured edits to `package-lock.json`.
    Lockfile {
        /// Desired `lockfileVersion`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lockfile_version: Option<u64>,
        /// Root dependencies to ensure, name → version
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        ensure_root_dependencies: BTreeMap<String, String>,
    },
    /// Dockerfile hygiene edits.
    Dockerfile {
        /// Pin the first `FROM` instruction to `image:tag`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pin_base_image: Option<BaseImagePin>,
        /// Append apt list cleanup to `RUN ... apt-get ...` lines
        #[serde(default)]
        apt_get_cleanup: bool,
    },
    /// Ensure the file exists and ends with a newline (go.sum).
    TouchFile {},
    /// Remove a named import from a Python source file.
    RemoveImport {
        /// Imported name to remove
        name: String,
        /// Restrict removal to `from <module> import ...` lines
        #[serde(default, skip_serializing_if = "Option::is_none")]
        module: Option<String>,
    },
}

/// One typed operation over one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixOperation {
    /// Operation type; must be allowed by the selected adapter
    #[serde(rename = "type")]
    pub op_type: OperationType,
    /// Target file; must appear in `FixPlan::files`
    pub file: String,
    /// Typed payload
    pub details: OperationDetails,
    /// Why this operation fixes the failure
    pub rationale: String,
    /// Log lines supporting the operation
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Violations of the plan's structural contract.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanContractError {
    #[error("plan has no target files")]
    NoFiles,
    #[error("operation targets `{0}`, which is not in plan.files")]
    OperationOutsideFiles(String),
    #[error("plan confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(String),
}

/// A complete fix plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixPlan {
    /// One-line root-cause statement
    pub root_cause: String,
    /// Plan category (e.g. `python_missing_dependency`)
    pub category: String,
    /// Planner confidence in [0, 1]
    pub confidence: f64,
    /// Files the plan may touch
    pub files: Vec<String>,
    /// Operations, applied in order
    pub operations: Vec<FixOperation>,
}

impl FixPlan {
    /// Check the structural invariants: `files` is non-empty, every
    /// operation targets a file in `files`, confidence is in range.
    pub fn check_contract(&self) -> Result<(), PlanContractError> {
        if self.files.is_empty() {
            return Err(PlanContractError::NoFiles);
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(PlanContractError::ConfidenceOutOfRange(
                self.confidence.to_string(),
            ));
        }
        for op in &self.operations {
            if !self.files.iter().any(|f| f == &op.file) {
                return Err(PlanContractError::OperationOutsideFiles(op.file.clone()));
            }
        }
        Ok(())
    }

    /// Distinct operation types used by the plan.
    #[must_use]
    pub fn operation_types(&self) -> Vec<OperationType> {
        let mut types: Vec<OperationType> = self.operations.iter().map(|op| op.op_type).collect();
        types.sort_unstable();
        types.dedup();
        types
    }
}
