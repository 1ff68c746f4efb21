//! Node adapter: missing modules and lockfile mismatches.

use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use schemas::{OperationType, ValidationStep};

use crate::{evidence_lines, has_file, Adapter, Detection};

static MISSING_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"Cannot find module ['"][^'"]+['"]"#).unwrap());
static LOCKFILE_MISMATCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"npm ERR!.*(lock ?file|ERESOLVE)|lockfileVersion").unwrap()
});
static NODE_SIGNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"npm (ERR!|install|ci)|package\.json|node_modules").unwrap());

/// Adapter for Node.js repositories.
#[derive(Debug, Default, Clone, Copy)]
pub struct NodeAdapter;

impl Adapter for NodeAdapter {
    fn name(&self) -> &'static str {
        "node"
    }

    fn detect(&self, log_text: &str, repo_files: &[String]) -> Option<Detection> {
        let missing = MISSING_MODULE.is_match(log_text);
        let lockfile = LOCKFILE_MISMATCH.is_match(log_text);
        let signs = NODE_SIGNS.is_match(log_text);
        let has_manifest = has_file(repo_files, "package.json");

        if !missing && !lockfile && !(signs && has_manifest) {
            return None;
        }

        let category = if lockfile && !missing {
            "node_lockfile_mismatch"
        } else {
            "node_missing_dependency"
        };
        let mut confidence: f64 = 0.0;
        if missing || lockfile {
            confidence += 0.6;
        }
        if signs {
            confidence += 0.2;
        }
        if has_manifest {
            confidence += 0.2;
        }

        Some(Detection {
            repo_language: "node".to_string(),
            category: category.to_string(),
            confidence: confidence.min(0.95),
            evidence_lines: evidence_lines(log_text, &[&*MISSING_MODULE, &*LOCKFILE_MISMATCH], 5),
        })
    }

    fn allowed_fix_types(&self) -> BTreeSet<OperationType> {
        [OperationType::AddDependency, OperationType::UpdateConfig]
            .into_iter()
            .collect()
    }

    fn allowed_categories(&self) -> BTreeSet<String> {
        ["node_missing_dependency", "node_lockfile_mismatch"]
            .iter()
            .map(|s| (*s).to_string())
            .collect()
    }

    fn build_validation_steps(&self, repo_path: &Path) -> Option<Vec<ValidationStep>> {
        let install = if repo_path.join("package-lock.json").exists() {
            ValidationStep::new("install", &["npm", "ci"], 600)
        } else {
            ValidationStep::new("install", &["npm", "install"], 600)
        };
        Some(vec![
            install,
            ValidationStep::new("test", &["npm", "test", "--silent"], 600),
        ])
    }
}
