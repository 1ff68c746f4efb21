//! Ordered adapter registry and selection.

use std::sync::Arc;
use tracing::debug;

use crate::docker::DockerAdapter;
use crate::golang::GoAdapter;
use crate::java::JavaAdapter;
use crate::node::NodeAdapter;
use crate::python::PythonAdapter;
use crate::{Adapter, Detection};

/// Minimum detection confidence for an adapter to win selection.
pub const MIN_CONFIDENCE: f64 = 0.5;

/// The selected adapter plus what it detected.
#[derive(Clone)]
pub struct Selection {
    /// The winning adapter
    pub adapter: Arc<dyn Adapter>,
    /// Its detection output
    pub detection: Detection,
}

/// Ordered adapter registry; read-only at runtime.
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn Adapter>>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl AdapterRegistry {
    /// The standard registry in declared priority order.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            adapters: vec![
                Arc::new(PythonAdapter),
                Arc::new(NodeAdapter),
                Arc::new(GoAdapter),
                Arc::new(JavaAdapter),
                Arc::new(DockerAdapter),
            ],
        }
    }

    /// Build from an explicit adapter list (tests, custom deployments).
    #[must_use]
    pub fn with_adapters(adapters: Vec<Arc<dyn Adapter>>) -> Self {
        Self { adapters }
    }

    /// Find an adapter by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.iter().find(|a| a.name() == name).cloned()
    }

    /// Select the first adapter, in declared priority order, whose
    /// detection confidence reaches [`MIN_CONFIDENCE`].
    #[must_use]
    pub fn select(&self, log_text: &str, repo_files: &[String]) -> Option<Selection> {
        for adapter in &self.adapters {
            if let Some(detection) = adapter.detect(log_text, repo_files) {
                debug!(
                    adapter = adapter.name(),
                    confidence = detection.confidence,
                    category = %detection.category,
                    "Adapter detection"
                );
                if detection.confidence >= MIN_CONFIDENCE {
                    return Some(Selection {
                        adapter: Arc::clone(adapter),
                        detection,
                    });
                }
            }
        }
        None
    }
}

/// Select against the standard registry.
#[must_use]
pub fn select_adapter(log_text: &str, repo_files: &[String]) -> Option<Selection> {
    AdapterRegistry::standard().select(log_text, repo_files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_wins_for_python_logs() {
        let selection = select_adapter(
            "ModuleNotFoundError: No module named 'requests'",
            &["pyproject.toml".to_string()],
        )
        .unwrap();
        assert_eq!(selection.adapter.name(), "python");
        assert_eq!(selection.detection.category, "python_missing_dependency");
    }

    #[test]
    fn test_go_wins_for_go_logs() {
        let selection = select_adapter(
            "main.go:5:2: no required module provides package github.com/acme/foo",
            &["go.mod".to_string()],
        )
        .unwrap();
        assert_eq!(selection.adapter.name(), "go");
    }

    #[test]
    fn test_none_when_nothing_matches() {
        assert!(select_adapter("everything is fine", &[]).is_none());
    }

    #[test]
    fn test_priority_order_breaks_ties() {
        // A log with both Python and Node evidence goes to Python, which is
        // declared first.
        let selection = select_adapter(
            "ModuleNotFoundError: No module named 'x'\nCannot find module 'y'",
            &["pyproject.toml".to_string(), "package.json".to_string()],
        )
        .unwrap();
        assert_eq!(selection.adapter.name(), "python");
    }

    #[test]
    fn test_by_name() {
        let registry = AdapterRegistry::standard();
        assert!(registry.by_name("docker").is_some());
        assert!(registry.by_name("rust").is_none());
    }

    #[test]
    fn test_reselection_with_repo_files_can_flip() {
        // Log evidence alone is ambiguous npm noise; with the full file
        // listing the node adapter clears the bar.
        let log = "npm ERR! ERESOLVE unable to resolve dependency tree";
        let before = select_adapter(log, &[]);
        let after = select_adapter(log, &["package.json".to_string()]);
        assert!(after.is_some());
        let after = after.unwrap();
        assert_eq!(after.adapter.name(), "node");
        if let Some(before) = before {
            assert!(before.detection.confidence <= after.detection.confidence);
        }
    }
}
