//! Python adapter: missing dependencies and lint cleanups.

use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use schemas::{OperationType, ValidationStep};

use crate::{evidence_lines, has_extension, has_file, Adapter, Detection};

static MISSING_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:ModuleNotFoundError|ImportError).*No module named ['"][^'"]+['"]|No module named ['"][^'"]+['"]"#).unwrap());
static UNUSED_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"F401.*imported but unused").unwrap());
static PYTHON_SIGNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Traceback \(most recent call last\):|pytest|pip install|\.py\b").unwrap()
});

/// Adapter for Python repositories.
#[derive(Debug, Default, Clone, Copy)]
pub struct PythonAdapter;

impl Adapter for PythonAdapter {
    fn name(&self) -> &'static str {
        "python"
    }

    fn detect(&self, log_text: &str, repo_files: &[String]) -> Option<Detection> {
        let missing = MISSING_MODULE.is_match(log_text);
        let unused = UNUSED_IMPORT.is_match(log_text);
        let signs = PYTHON_SIGNS.is_match(log_text);
        let has_manifest = has_file(repo_files, "pyproject.toml")
            || has_file(repo_files, "requirements.txt")
            || has_extension(repo_files, ".py");

        if !missing && !unused && !(signs && has_manifest) {
            return None;
        }

        let category = if unused && !missing {
            "lint_format"
        } else {
            "python_missing_dependency"
        };
        let mut confidence: f64 = 0.0;
        if missing || unused {
            confidence += 0.6;
        }
        if signs {
            confidence += 0.2;
        }
        if has_manifest {
            confidence += 0.2;
        }

        Some(Detection {
            repo_language: "python".to_string(),
            category: category.to_string(),
            confidence: confidence.min(0.95),
            evidence_lines: evidence_lines(
                log_text,
                &[&*MISSING_MODULE, &*UNUSED_IMPORT],
                5,
            ),
        })
    }

    fn allowed_fix_types(&self) -> BTreeSet<OperationType> {
        [
            OperationType::AddDependency,
            OperationType::PinDependency,
            OperationType::RemoveUnused,
        ]
        .into_iter()
        .collect()
    }

    fn allowed_categories(&self) -> BTreeSet<String> {
        ["python_missing_dependency", "lint_format"]
            .iter()
            .map(|s| (*s).to_string())
            .collect()
    }

    fn build_validation_steps(&self, repo_path: &Path) -> Option<Vec<ValidationStep>> {
        let install = if repo_path.join("requirements.txt").exists() {
            ValidationStep::new("install", &["pip", "install", "-r", "requirements.txt"], 300)
        } else if repo_path.join("pyproject.toml").exists() {
            ValidationStep::new("install", &["pip", "install", "-e", "."], 300)
        } else {
            return None;
        };
        Some(vec![
            install,
            ValidationStep::new("test", &["python", "-m", "pytest", "-x", "-q"], 600),
        ])
    }
}
