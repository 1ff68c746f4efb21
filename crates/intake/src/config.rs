//! Server settings.
//!
//! Loaded once at startup from an optional YAML file; every section has a
//! default so a bare `remedy serve` works out of the box (with webhook
//! verification rejecting everything until secrets are configured).

use serde::Deserialize;
use std::path::{Path, PathBuf};

use pipeline::RetryPolicy;

use crate::verify::WebhookSecrets;

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_true() -> bool {
    true
}

/// Process configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Address the webhook server binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Safety policy YAML; the standard policy applies when absent
    #[serde(default)]
    pub policy_path: Option<PathBuf>,
    /// GitHub API token for log download and commit metadata
    #[serde(default)]
    pub github_token: Option<String>,
    /// Webhook shared secrets per provider
    #[serde(default)]
    pub secrets: WebhookSecrets,
    /// Governor retry/cooldown/concurrency settings
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Concurrent pipeline workers
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    /// Drop events whose sender is a bot account
    #[serde(default = "default_true")]
    pub skip_bot_senders: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            policy_path: None,
            github_token: None,
            secrets: WebhookSecrets::default(),
            retry: RetryPolicy::default(),
            worker_concurrency: default_worker_concurrency(),
            skip_bot_senders: true,
        }
    }
}

impl Settings {
    /// Load from a YAML file; `None` yields the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }
}
