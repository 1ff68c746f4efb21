//! Secret redaction for persisted artifacts.
//!
//! Everything that ends up on a run row or inside a provenance artifact
//! passes through a [`Redactor`] built from the policy's forbidden secret
//! patterns.

use regex::Regex;
use serde_json::Value;
use tracing::warn;

/// Replacement for matched secret material.
pub const MASK: &str = "[REDACTED]";

/// Masks strings matching the policy's secret patterns.
pub struct Redactor {
    patterns: Vec<Regex>,
}

impl Redactor {
    /// Compile the given patterns, skipping invalid ones with a warning.
    #[must_use]
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "Skipping invalid redaction pattern");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    /// Mask every pattern match in `value`.
    #[must_use]
    pub fn redact_text(&self, value: &str) -> String {
        let mut redacted = value.to_string();
        for pattern in &self.patterns {
            redacted = pattern.replace_all(&redacted, MASK).into_owned();
        }
        redacted
    }

    /// Recursively mask every string inside a JSON value.
    #[must_use]
    pub fn redact_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.redact_text(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.redact_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Mask an optional string, passing `None` through.
    #[must_use]
    pub fn redact_opt(&self, value: Option<&str>) -> Option<String> {
        value.map(|v| self.redact_text(v))
    }
}
