//! Language/toolchain adapters.
//!
//! An adapter detects whether it applies to a failure (from logs plus a
//! repo file listing), gates which operation types and plan categories the
//! orchestrator may use, and optionally prescribes concrete validation
//! commands for the sandbox.

pub mod docker;
pub mod golang;
pub mod java;
pub mod node;
pub mod python;
pub mod registry;

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use schemas::{OperationType, ValidationStep};

pub use registry::{select_adapter, AdapterRegistry, Selection};

/// What an adapter detected about a failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// Repository language the adapter owns
    pub repo_language: String,
    /// Plan category the evidence points at
    pub category: String,
    /// Detection confidence in [0, 1]
    pub confidence: f64,
    /// Log lines supporting the detection
    pub evidence_lines: Vec<String>,
}

/// A language/toolchain adapter.
pub trait Adapter: Send + Sync {
    /// Stable adapter name (`python`, `node`, `go`, `java`, `docker`).
    fn name(&self) -> &'static str;

    /// Detect applicability from log text and a repo file listing.
    /// Returns `None` when nothing matched at all.
    fn detect(&self, log_text: &str, repo_files: &[String]) -> Option<Detection>;

    /// Operation types the orchestrator may emit under this adapter.
    fn allowed_fix_types(&self) -> BTreeSet<OperationType>;

    /// Plan categories compatible with this adapter.
    fn allowed_categories(&self) -> BTreeSet<String>;

    /// Concrete install/test commands for the sandbox, when the adapter
    /// prescribes them.
    fn build_validation_steps(&self, repo_path: &Path) -> Option<Vec<ValidationStep>>;

    /// Whether sandbox validation needs network access (package installs).
    fn needs_network(&self) -> bool {
        true
    }
}

/// Collect up to `limit` log lines matching any of the given patterns.
pub(crate) fn evidence_lines(log_text: &str, patterns: &[&regex::Regex], limit: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for line in log_text.lines() {
        if patterns.iter().any(|p| p.is_match(line)) {
            lines.push(line.trim().to_string());
            if lines.len() >= limit {
                break;
            }
        }
    }
    lines
}

pub(crate) fn has_file(repo_files: &[String], name: &str) -> bool {
    repo_files
        .iter()
        .any(|f| f == name || f.ends_with(&format!("/{name}")))
}

pub(crate) fn has_extension(repo_files: &[String], ext: &str) -> bool {
    repo_files.iter().any(|f| f.ends_with(ext))
}
