//! YAML policy file loading.

use std::path::Path;
use thiserror::Error;

use crate::policy::SafetyPolicy;

/// Errors loading a policy file.
#[derive(Debug, Error)]
pub enum PolicyLoadError {
    #[error("failed to read policy file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse policy file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Load a [`SafetyPolicy`] from a YAML file. Missing sections fall back to
/// their defaults, so a partial policy file is valid.
pub fn load_policy_from_file(path: &Path) -> Result<SafetyPolicy, PolicyLoadError> {
    let content = std::fs::read_to_string(path)?;
    let policy = serde_yaml::from_str(&content)?;
    Ok(policy)
}
