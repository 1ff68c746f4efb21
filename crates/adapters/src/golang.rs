//! Go adapter: missing modules and `go mod tidy` hygiene.

use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use schemas::{OperationType, ValidationStep};

use crate::{evidence_lines, has_file, Adapter, Detection};

static MISSING_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"no required module provides package\s+\S+").unwrap());
static MOD_TIDY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"missing go\.sum entry|go mod tidy|go\.sum.*(missing|mismatch)").unwrap()
});
static GO_SIGNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"go: |go build|go test|\.go:\d+").unwrap());

/// Adapter for Go repositories.
#[derive(Debug, Default, Clone, Copy)]
pub struct GoAdapter;

impl Adapter for GoAdapter {
    fn name(&self) -> &'static str {
        "go"
    }

    fn detect(&self, log_text: &str, repo_files: &[String]) -> Option<Detection> {
        let missing = MISSING_MODULE.is_match(log_text);
        let tidy = MOD_TIDY.is_match(log_text);
        let signs = GO_SIGNS.is_match(log_text);
        let has_manifest = has_file(repo_files, "go.mod");

        if !missing && !tidy && !(signs && has_manifest) {
            return None;
        }

        let category = if missing {
            "go_add_missing_module"
        } else {
            "go_mod_tidy"
        };
        let mut confidence: f64 = 0.0;
        if missing || tidy {
            confidence += 0.6;
        }
        if signs {
            confidence += 0.2;
        }
        if has_manifest {
            confidence += 0.2;
        }

        Some(Detection {
            repo_language: "go".to_string(),
            category: category.to_string(),
            confidence: confidence.min(0.95),
            evidence_lines: evidence_lines(log_text, &[&*MISSING_MODULE, &*MOD_TIDY], 5),
        })
    }

    fn allowed_fix_types(&self) -> BTreeSet<OperationType> {
        [OperationType::PinDependency, OperationType::UpdateConfig]
            .into_iter()
            .collect()
    }

    fn allowed_categories(&self) -> BTreeSet<String> {
        ["go_add_missing_module", "go_mod_tidy"]
            .iter()
            .map(|s| (*s).to_string())
            .collect()
    }

    fn build_validation_steps(&self, _repo_path: &Path) -> Option<Vec<ValidationStep>> {
        Some(vec![
            ValidationStep::new("install", &["go", "mod", "download"], 300),
            ValidationStep::new("test", &["go", "test", "./..."], 600),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_missing_module() {
        let detection = GoAdapter
            .detect(
                "main.go:5:2: no required module provides package github.com/acme/foo",
                &["go.mod".to_string()],
            )
            .unwrap();
        assert_eq!(detection.category, "go_add_missing_module");
        assert!(detection.confidence >= 0.5);
    }

    #[test]
    fn test_detects_mod_tidy() {
        let detection = GoAdapter
            .detect(
                "go: updates to go.mod needed; to update it:\n\tgo mod tidy",
                &["go.mod".to_string(), "go.sum".to_string()],
            )
            .unwrap();
        assert_eq!(detection.category, "go_mod_tidy");
    }

    #[test]
    fn test_ignores_node_logs() {
        assert!(GoAdapter
            .detect("Cannot find module 'lodash'", &["package.json".to_string()])
            .is_none());
    }
}
