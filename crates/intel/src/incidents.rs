//! In-memory incident similarity store.
//!
//! Embeds failure descriptions as token-hash bag-of-words vectors and
//! retrieves similar past incidents by cosine similarity. Good enough to
//! surface "we have seen this before" without an external vector database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use schemas::SimilarIncident;

/// Embedding dimension of the token-hash vectors.
const EMBEDDING_DIM: usize = 256;

/// A stored incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentRecord {
    /// Incident identifier
    pub incident_id: String,
    /// One-line summary
    pub summary: String,
    /// Recorded root cause
    pub root_cause: Option<String>,
    /// Recorded resolution
    pub resolution: Option<String>,
    /// Diff that fixed the incident, if kept
    pub fix_diff: Option<String>,
    /// When the incident occurred
    pub occurred_at: Option<DateTime<Utc>>,
}

struct StoredIncident {
    record: IncidentRecord,
    embedding: Vec<f64>,
}

/// Similarity store over historical incidents.
#[derive(Default)]
pub struct IncidentStore {
    incidents: Vec<StoredIncident>,
}

impl IncidentStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored incidents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.incidents.len()
    }

    /// Whether the store holds no incidents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.incidents.is_empty()
    }

    /// Add an incident, embedding `text` as its searchable representation.
    pub fn add(&mut self, record: IncidentRecord, text: &str) {
        self.incidents.push(StoredIncident {
            record,
            embedding: embed(text),
        });
    }

    /// Return up to `k` incidents most similar to `text`, best first.
    #[must_use]
    pub fn search(&self, text: &str, k: usize) -> Vec<(IncidentRecord, f64)> {
        let query = embed(text);
        let mut scored: Vec<(IncidentRecord, f64)> = self
            .incidents
            .iter()
            .map(|s| (s.record.clone(), cosine(&query, &s.embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    /// Search and convert to [`SimilarIncident`]s above `min_similarity`.
    #[must_use]
    pub fn similar(&self, text: &str, k: usize, min_similarity: f64) -> Vec<SimilarIncident> {
        self.search(text, k)
            .into_iter()
            .filter(|(_, score)| *score >= min_similarity)
            .map(|(record, score)| SimilarIncident {
                incident_id: record.incident_id,
                similarity_score: score,
                summary: record.summary,
                root_cause: record.root_cause,
                resolution: record.resolution,
                fix_diff: record.fix_diff,
                occurred_at: record.occurred_at,
            })
            .collect()
    }
}

/// Build the searchable text for a failure.
#[must_use]
pub fn build_failure_text(
    error_messages: &[String],
    stack_summaries: &[String],
    changed_files: &[String],
    commit_message: Option<&str>,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    parts.extend(error_messages.iter().cloned());
    parts.extend(stack_summaries.iter().cloned());
    parts.extend(changed_files.iter().cloned());
    if let Some(msg) = commit_message {
        parts.push(msg.to_string());
    }
    parts.join("\n")
}

fn token_hash(token: &str) -> usize {
    // FNV-1a, stable across runs
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    (hash % EMBEDDING_DIM as u64) as usize
}

fn embed(text: &str) -> Vec<f64> {
    let mut vector = vec![0.0; EMBEDDING_DIM];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '.')
        .filter(|t| t.len() > 2)
    {
        vector[token_hash(token)] += 1.0;
    }
    vector
}

fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
