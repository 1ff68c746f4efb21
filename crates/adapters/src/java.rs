//! Java adapter: Maven dependency and plugin version pinning.

use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use schemas::{OperationType, ValidationStep};

use crate::{evidence_lines, has_file, Adapter, Detection};

static DEP_VERSION_MISSING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"dependencies\.dependency\.version.*is missing").unwrap()
});
static PLUGIN_UNRESOLVED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Plugin\s+\S+\s+or one of its dependencies could not be resolved").unwrap()
});
static JAVA_SIGNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[ERROR\].*pom\.xml|mvn |maven|BUILD FAILURE").unwrap());

/// Adapter for Maven-built Java repositories.
#[derive(Debug, Default, Clone, Copy)]
pub struct JavaAdapter;

impl Adapter for JavaAdapter {
    fn name(&self) -> &'static str {
        "java"
    }

    fn detect(&self, log_text: &str, repo_files: &[String]) -> Option<Detection> {
        let dep_missing = DEP_VERSION_MISSING.is_match(log_text);
        let plugin_missing = PLUGIN_UNRESOLVED.is_match(log_text);
        let signs = JAVA_SIGNS.is_match(log_text);
        let has_manifest = has_file(repo_files, "pom.xml");

        if !dep_missing && !plugin_missing && !(signs && has_manifest) {
            return None;
        }

        let category = if plugin_missing {
            "java_plugin_version_missing"
        } else {
            "java_dependency_version_missing"
        };
        let mut confidence: f64 = 0.0;
        if dep_missing || plugin_missing {
            confidence += 0.6;
        }
        if signs {
            confidence += 0.2;
        }
        if has_manifest {
            confidence += 0.2;
        }

        Some(Detection {
            repo_language: "java".to_string(),
            category: category.to_string(),
            confidence: confidence.min(0.95),
            evidence_lines: evidence_lines(
                log_text,
                &[&*DEP_VERSION_MISSING, &*PLUGIN_UNRESOLVED],
                5,
            ),
        })
    }

    fn allowed_fix_types(&self) -> BTreeSet<OperationType> {
        [OperationType::PinDependency].into_iter().collect()
    }

    fn allowed_categories(&self) -> BTreeSet<String> {
        ["java_dependency_version_missing", "java_plugin_version_missing"]
            .iter()
            .map(|s| (*s).to_string())
            .collect()
    }

    fn build_validation_steps(&self, _repo_path: &Path) -> Option<Vec<ValidationStep>> {
        Some(vec![ValidationStep::new(
            "test",
            &["mvn", "-q", "-B", "test"],
            900,
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_missing_dependency_version() {
        let detection = JavaAdapter
            .detect(
                "[ERROR] 'dependencies.dependency.version' for org.junit.jupiter:junit-jupiter is missing",
                &["pom.xml".to_string()],
            )
            .unwrap();
        assert_eq!(detection.category, "java_dependency_version_missing");
    }

    #[test]
    fn test_detects_unresolved_plugin() {
        let detection = JavaAdapter
            .detect(
                "Plugin org.apache.maven.plugins:maven-surefire-plugin:3.1.2 or one of its dependencies could not be resolved",
                &["pom.xml".to_string()],
            )
            .unwrap();
        assert_eq!(detection.category, "java_plugin_version_missing");
    }

    #[test]
    fn test_ignores_go_logs() {
        assert!(JavaAdapter
            .detect(
                "no required module provides package github.com/acme/foo",
                &["go.mod".to_string()],
            )
            .is_none());
    }
}
