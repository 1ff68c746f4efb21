//! Docker adapter: base image pinning and apt cache hygiene.

use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use schemas::{OperationType, ValidationStep};

use crate::{evidence_lines, has_file, Adapter, Detection};

static BAD_BASE_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"manifest for \S+ not found|pull access denied|invalid reference format").unwrap()
});
static APT_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"apt-get.*(Could not get lock|Failed to fetch|Hash Sum mismatch)").unwrap()
});
static DOCKER_SIGNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"docker build|Dockerfile|Step \d+/\d+ :").unwrap());

/// Adapter for Dockerfile-centric failures.
#[derive(Debug, Default, Clone, Copy)]
pub struct DockerAdapter;

impl Adapter for DockerAdapter {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn detect(&self, log_text: &str, repo_files: &[String]) -> Option<Detection> {
        let bad_image = BAD_BASE_IMAGE.is_match(log_text);
        let apt = APT_FAILURE.is_match(log_text);
        let signs = DOCKER_SIGNS.is_match(log_text);
        let has_dockerfile = has_file(repo_files, "Dockerfile");

        if !bad_image && !apt && !(signs && has_dockerfile) {
            return None;
        }

        let category = if apt && !bad_image {
            "docker_apt_get_cleanup"
        } else {
            "docker_pin_base_image"
        };
        let mut confidence: f64 = 0.0;
        if bad_image || apt {
            confidence += 0.6;
        }
        if signs {
            confidence += 0.2;
        }
        if has_dockerfile {
            confidence += 0.2;
        }

        Some(Detection {
            repo_language: "docker".to_string(),
            category: category.to_string(),
            confidence: confidence.min(0.95),
            evidence_lines: evidence_lines(log_text, &[&*BAD_BASE_IMAGE, &*APT_FAILURE], 5),
        })
    }

    fn allowed_fix_types(&self) -> BTreeSet<OperationType> {
        [OperationType::UpdateConfig].into_iter().collect()
    }

    fn allowed_categories(&self) -> BTreeSet<String> {
        ["docker_pin_base_image", "docker_apt_get_cleanup"]
            .iter()
            .map(|s| (*s).to_string())
            .collect()
    }

    fn build_validation_steps(&self, _repo_path: &Path) -> Option<Vec<ValidationStep>> {
        // No in-container test command; validation ends at the patch check.
        None
    }

    fn needs_network(&self) -> bool {
        false
    }
}
