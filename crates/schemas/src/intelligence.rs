//! Classification and root-cause analysis results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Failure category produced by the rule-based classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Infrastructure,
    Dependency,
    Code,
    Configuration,
    Test,
    Flaky,
    Security,
    Unknown,
}

impl FailureCategory {
    /// Category name used in logs and metrics labels.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Infrastructure => "infrastructure",
            Self::Dependency => "dependency",
            Self::Code => "code",
            Self::Configuration => "configuration",
            Self::Test => "test",
            Self::Flaky => "flaky",
            Self::Security => "security",
            Self::Unknown => "unknown",
        }
    }
}

/// Output of the rule-based classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    /// Winning category
    pub category: FailureCategory,
    /// Static confidence of the winning rule, in [0, 1]
    pub confidence: f64,
    /// Human-readable reason from the winning rule
    pub reasoning: String,
    /// Regex patterns that matched
    #[serde(default)]
    pub indicators: Vec<String>,
    /// Category of the runner-up rule, when it differs from the winner
    pub secondary_category: Option<FailureCategory>,
}

impl Classification {
    /// The "nothing matched" classification.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            category: FailureCategory::Unknown,
            confidence: 0.0,
            reasoning: "No classification patterns matched".to_string(),
            indicators: vec![],
            secondary_category: None,
        }
    }
}

/// A file judged relevant to the failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffectedFile {
    /// File path
    pub filename: String,
    /// Relevance in [0, 1]; stack-frame files start at 0.9
    pub relevance_score: f64,
    /// Why the file was included
    pub reason: String,
    /// Whether the file appears in a stack trace
    pub is_in_stack_trace: bool,
    /// Whether the file changed in the failing commit
    pub is_recently_changed: bool,
    /// Suggested reviewer action
    pub suggested_action: Option<String>,
}

/// A root-cause hypothesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcaHypothesis {
    /// Human-readable description
    pub description: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Supporting evidence lines
    #[serde(default)]
    pub evidence: Vec<String>,
    /// Suggested fix, when the category implies one
    pub suggested_fix: Option<String>,
}

/// A similar historical incident retrieved from the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarIncident {
    /// Incident identifier
    pub incident_id: String,
    /// Cosine similarity in [0, 1]
    pub similarity_score: f64,
    /// Incident summary
    pub summary: String,
    /// Recorded root cause
    pub root_cause: Option<String>,
    /// Recorded resolution
    pub resolution: Option<String>,
    /// Diff applied to fix the incident, if kept
    pub fix_diff: Option<String>,
    /// When the incident occurred
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Full root-cause analysis output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcaResult {
    /// Event the analysis belongs to
    pub event_id: Uuid,
    /// Classifier output
    pub classification: Classification,
    /// Best hypothesis
    pub primary_hypothesis: RcaHypothesis,
    /// Up to three alternatives, descending confidence
    #[serde(default)]
    pub alternative_hypotheses: Vec<RcaHypothesis>,
    /// Relevant files, descending relevance
    #[serde(default)]
    pub affected_files: Vec<AffectedFile>,
    /// Similar incidents above the 0.3 threshold
    #[serde(default)]
    pub similar_incidents: Vec<SimilarIncident>,
    /// Suggested fix patterns
    #[serde(default)]
    pub suggested_patterns: Vec<String>,
    /// Wall-clock analysis time
    pub analysis_time_seconds: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_names() {
        assert_eq!(FailureCategory::Dependency.name(), "dependency");
        assert_eq!(FailureCategory::Flaky.name(), "flaky");
    }

    #[test]
    fn test_unknown_classification() {
        let c = Classification::unknown();
        assert_eq!(c.category, FailureCategory::Unknown);
        assert_eq!(c.confidence, 0.0);
        assert!(c.secondary_category.is_none());
    }

    #[test]
    fn test_category_serde_snake_case() {
        let json = serde_json::to_string(&FailureCategory::Infrastructure).unwrap();
        assert_eq!(json, "\"infrastructure\"");
    }
}
