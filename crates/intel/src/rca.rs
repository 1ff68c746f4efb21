//! Root-cause analysis.
//!
//! Combines classification, affected-file analysis, and incident similarity
//! into a ranked set of hypotheses.

use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use schemas::{
    AffectedFile, Classification, FailureCategory, FailureContextBundle, RcaHypothesis, RcaResult,
};

use crate::classifier::FailureClassifier;
use crate::incidents::{build_failure_text, IncidentStore};

/// Minimum similarity for a historical incident to be retained.
const MIN_SIMILARITY: f64 = 0.3;
/// Similarity above which an incident spawns its own hypothesis.
const HYPOTHESIS_SIMILARITY: f64 = 0.7;
/// Maximum affected files reported.
const MAX_AFFECTED_FILES: usize = 10;
/// Maximum alternative hypotheses reported.
const MAX_ALTERNATIVES: usize = 3;

/// Root-cause analysis engine.
pub struct RcaEngine {
    classifier: FailureClassifier,
    incident_store: Option<Arc<IncidentStore>>,
}

impl Default for RcaEngine {
    fn default() -> Self {
        Self::new(None)
    }
}

impl RcaEngine {
    /// Create an engine, optionally attached to an incident store.
    #[must_use]
    pub fn new(incident_store: Option<Arc<IncidentStore>>) -> Self {
        Self {
            classifier: FailureClassifier::new(),
            incident_store,
        }
    }

    /// Analyze a failure context and produce a ranked hypothesis set.
    #[must_use]
    pub fn analyze(&self, context: &FailureContextBundle) -> RcaResult {
        let started = Instant::now();

        let classification = self.classifier.classify(context);
        let affected_files = analyze_affected_files(context, &classification);
        let similar_incidents = self.search_similar(context);
        let (primary, alternatives) =
            generate_hypotheses(context, &classification, &affected_files, &similar_incidents);
        let suggested_patterns = fix_patterns(&classification, &similar_incidents);

        let analysis_time = started.elapsed().as_secs_f64();
        info!(
            event_id = %context.event_id,
            category = classification.category.name(),
            confidence = classification.confidence,
            similar_incidents = similar_incidents.len(),
            "RCA analysis complete"
        );

        RcaResult {
            event_id: context.event_id,
            classification,
            primary_hypothesis: primary,
            alternative_hypotheses: alternatives,
            affected_files,
            similar_incidents,
            suggested_patterns,
            analysis_time_seconds: Some(analysis_time),
        }
    }

    fn search_similar(&self, context: &FailureContextBundle) -> Vec<schemas::SimilarIncident> {
        let Some(store) = &self.incident_store else {
            return vec![];
        };
        if store.is_empty() {
            return vec![];
        }
        let error_messages: Vec<String> =
            context.errors.iter().map(|e| e.message.clone()).collect();
        let stack_summaries: Vec<String> = context
            .stack_traces
            .iter()
            .map(|t| format!("{}: {}", t.exception_type, t.message))
            .collect();
        let text = build_failure_text(
            &error_messages,
            &stack_summaries,
            &context.changed_filenames(),
            context.commit_message.as_deref(),
        );
        store.similar(&text, 5, MIN_SIMILARITY)
    }
}

fn is_library_file(path: &str) -> bool {
    [
        "node_modules",
        "site-packages",
        "vendor",
        ".venv",
        "dist-packages",
        "/usr/lib",
        "/usr/local/lib",
    ]
    .iter()
    .any(|p| path.contains(p))
}

fn analyze_affected_files(
    context: &FailureContextBundle,
    classification: &Classification,
) -> Vec<AffectedFile> {
    let mut affected: Vec<AffectedFile> = Vec::new();

    let mut stack_trace_files: Vec<String> = Vec::new();
    for trace in &context.stack_traces {
        for frame in &trace.frames {
            if let Some(file) = &frame.file {
                if !is_library_file(file) && !stack_trace_files.contains(file) {
                    stack_trace_files.push(file.clone());
                }
            }
        }
    }

    let changed_names = context.changed_filenames();
    for file in &stack_trace_files {
        affected.push(AffectedFile {
            filename: file.clone(),
            relevance_score: 0.9,
            reason: "Appears in stack trace".to_string(),
            is_in_stack_trace: true,
            is_recently_changed: changed_names.contains(file),
            suggested_action: Some("Review error handling at this location".to_string()),
        });
    }

    for changed in &context.changed_files {
        if stack_trace_files.contains(&changed.filename) {
            continue;
        }
        let relevance = file_relevance(&changed.filename, classification, context);
        if relevance > 0.3 {
            affected.push(AffectedFile {
                filename: changed.filename.clone(),
                relevance_score: relevance,
                reason: "Recently changed".to_string(),
                is_in_stack_trace: false,
                is_recently_changed: true,
                suggested_action: file_action(&changed.filename, classification),
            });
        }
    }

    affected.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    affected.truncate(MAX_AFFECTED_FILES);
    affected
}

fn file_relevance(
    filename: &str,
    classification: &Classification,
    context: &FailureContextBundle,
) -> f64 {
    let mut relevance: f64 = 0.3;

    match classification.category {
        FailureCategory::Dependency => {
            if ["package.json", "requirements.txt", "pyproject.toml", "Cargo.toml", "go.mod", "pom.xml"]
                .iter()
                .any(|p| filename.contains(p))
            {
                relevance += 0.5;
            }
        }
        FailureCategory::Configuration => {
            if [".env", "config", ".yml", ".yaml", ".json"]
                .iter()
                .any(|p| filename.contains(p))
            {
                relevance += 0.4;
            }
        }
        FailureCategory::Test => {
            if filename.to_lowercase().contains("test") {
                relevance += 0.4;
            }
        }
        _ => {}
    }

    // Extension shared with a stack frame nudges relevance up
    if let Some(ext) = filename.rsplit('.').next() {
        let ext_match = context.stack_traces.iter().any(|t| {
            t.frames
                .iter()
                .any(|f| f.file.as_deref().is_some_and(|file| file.ends_with(ext)))
        });
        if ext_match {
            relevance += 0.2;
        }
    }

    relevance.min(1.0)
}

fn file_action(filename: &str, classification: &Classification) -> Option<String> {
    match classification.category {
        FailureCategory::Dependency => {
            if filename.contains("package.json") {
                Some("Check npm dependencies".to_string())
            } else if filename.contains("requirements") || filename.contains("pyproject") {
                Some("Verify Python packages".to_string())
            } else {
                Some("Review recent changes".to_string())
            }
        }
        FailureCategory::Configuration => Some("Review configuration values".to_string()),
        _ => Some("Review recent changes".to_string()),
    }
}

fn category_description(category: FailureCategory) -> &'static str {
    match category {
        FailureCategory::Infrastructure => {
            "Infrastructure issue detected (resource exhaustion or CI system failure)"
        }
        FailureCategory::Dependency => "Dependency issue detected (missing or incompatible package)",
        FailureCategory::Code => "Code error detected (type error, logic error, or bug)",
        FailureCategory::Configuration => {
            "Configuration issue detected (missing variable or invalid config)"
        }
        FailureCategory::Test => "Test assertion failure (test logic or assertion issue)",
        FailureCategory::Flaky => "Potentially flaky failure (timeout or non-deterministic behavior)",
        FailureCategory::Security => "Security scan failure (vulnerability detected)",
        FailureCategory::Unknown => "Unable to determine specific cause",
    }
}

fn suggested_fix(category: FailureCategory) -> Option<String> {
    let suggestion = match category {
        FailureCategory::Infrastructure => "Retry the job or check CI infrastructure status",
        FailureCategory::Dependency => "Check package versions and update dependencies",
        FailureCategory::Code => "Review the error location and add proper error handling",
        FailureCategory::Configuration => "Verify all required environment variables are set",
        FailureCategory::Test => "Review test assertions and expected values",
        FailureCategory::Flaky => "Consider adding retries or investigating timing issues",
        FailureCategory::Security => "Review and remediate the security vulnerability",
        FailureCategory::Unknown => return None,
    };
    Some(suggestion.to_string())
}

fn generate_hypotheses(
    context: &FailureContextBundle,
    classification: &Classification,
    affected_files: &[AffectedFile],
    similar_incidents: &[schemas::SimilarIncident],
) -> (RcaHypothesis, Vec<RcaHypothesis>) {
    let mut hypotheses: Vec<RcaHypothesis> = Vec::new();

    let mut description = category_description(classification.category).to_string();
    if let Some(trace) = context.stack_traces.first() {
        description.push_str(&format!(" The {} occurred", trace.exception_type));
        if let Some(frame) = trace.frames.first() {
            if let Some(file) = &frame.file {
                description.push_str(&format!(" in {file}"));
            }
            if let Some(function) = &frame.function {
                description.push_str(&format!(" ({function})"));
            }
        }
        description.push('.');
    }
    if let Some(top) = affected_files.first() {
        if top.is_recently_changed {
            description.push_str(&format!(
                " Recent changes to {} may be related.",
                top.filename
            ));
        }
    }

    let mut evidence: Vec<String> = classification
        .indicators
        .iter()
        .take(3)
        .map(|i| format!("Pattern matched: {i}"))
        .collect();
    for error in context.errors.iter().take(2) {
        let truncated: String = error.message.chars().take(100).collect();
        evidence.push(format!("Error: {truncated}"));
    }
    if let Some(trace) = context.stack_traces.first() {
        let truncated: String = trace.message.chars().take(100).collect();
        evidence.push(format!("Exception: {}: {truncated}", trace.exception_type));
    }

    hypotheses.push(RcaHypothesis {
        description,
        confidence: classification.confidence,
        evidence,
        suggested_fix: suggested_fix(classification.category),
    });

    if let Some(best) = similar_incidents.first() {
        if best.similarity_score >= HYPOTHESIS_SIMILARITY {
            if let Some(root_cause) = &best.root_cause {
                hypotheses.push(RcaHypothesis {
                    description: format!("Similar to past incident: {root_cause}"),
                    confidence: best.similarity_score * 0.9,
                    evidence: vec![
                        format!("Similar incident: {}", best.summary),
                        format!("Similarity score: {:.2}", best.similarity_score),
                    ],
                    suggested_fix: best.resolution.clone(),
                });
            }
        }
    }

    if let Some(secondary) = classification.secondary_category {
        hypotheses.push(RcaHypothesis {
            description: category_description(secondary).to_string(),
            confidence: classification.confidence * 0.7,
            evidence: vec!["Secondary pattern detected".to_string()],
            suggested_fix: None,
        });
    }

    hypotheses.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let primary = hypotheses.remove(0);
    hypotheses.truncate(MAX_ALTERNATIVES);
    (primary, hypotheses)
}

fn fix_patterns(
    classification: &Classification,
    similar_incidents: &[schemas::SimilarIncident],
) -> Vec<String> {
    let mut patterns: Vec<String> = Vec::new();

    for incident in similar_incidents {
        if incident.similarity_score >= 0.6 {
            if let Some(resolution) = &incident.resolution {
                if !patterns.contains(resolution) {
                    patterns.push(resolution.clone());
                }
            }
        }
    }

    let generic: &[&str] = match classification.category {
        FailureCategory::Dependency => &[
            "Run dependency update",
            "Pin dependency versions",
            "Clear dependency cache",
        ],
        FailureCategory::Configuration => &[
            "Add missing environment variable",
            "Update configuration file",
            "Verify secrets are available",
        ],
        FailureCategory::Code => &[
            "Add null/undefined check",
            "Fix type mismatch",
            "Handle edge case",
        ],
        _ => &[],
    };
    for pattern in generic {
        let owned = (*pattern).to_string();
        if !patterns.contains(&owned) {
            patterns.push(owned);
        }
    }

    patterns.truncate(5);
    patterns
}
