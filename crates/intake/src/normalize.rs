//! Provider payload normalization.
//!
//! Every provider's webhook payload becomes a [`NormalizedPipelineEvent`]
//! or an explicit "ignored" outcome. Only failed, cancelled, or timed-out
//! job completions are accepted; everything else is ignored with a reason.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

use schemas::{CiProvider, FailureType, NormalizedPipelineEvent};

/// Invalid payload; maps to `400`.
#[derive(Debug, Error)]
#[error("invalid payload: {0}")]
pub struct NormalizeError(pub String);

/// Outcome of normalization.
#[derive(Debug)]
pub enum NormalizeOutcome {
    /// Process this event.
    Accepted(Box<NormalizedPipelineEvent>),
    /// Ignore with a reason echoed to the caller.
    Ignored(String),
}

static TEST_PATTERNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(test|tests|unit|integration|e2e|spec|check)\b").unwrap());
static DEPLOY_PATTERNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(deploy|release|publish|push|rollout)\b").unwrap());
static BUILD_PATTERNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(build|compile|package|bundle|assemble)\b").unwrap());
static INFRA_PATTERNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(infra|terraform|provision|setup)\b").unwrap());

/// Infer the coarse failure type from the job name; timeouts win outright.
fn infer_failure_type(job_name: &str, timed_out: bool) -> FailureType {
    if timed_out {
        return FailureType::Timeout;
    }
    if TEST_PATTERNS.is_match(job_name) {
        return FailureType::Test;
    }
    if DEPLOY_PATTERNS.is_match(job_name) {
        return FailureType::Deploy;
    }
    if BUILD_PATTERNS.is_match(job_name) {
        return FailureType::Build;
    }
    if INFRA_PATTERNS.is_match(job_name) {
        return FailureType::Infrastructure;
    }
    FailureType::Build
}

fn str_at<'v>(value: &'v Value, path: &[&str]) -> Option<&'v str> {
    let mut cursor = value;
    for key in path {
        cursor = cursor.get(key)?;
    }
    cursor.as_str()
}

fn u64_at(value: &Value, path: &[&str]) -> Option<u64> {
    let mut cursor = value;
    for key in path {
        cursor = cursor.get(key)?;
    }
    cursor.as_u64()
}

fn timestamp_at(value: &Value, paths: &[&[&str]]) -> DateTime<Utc> {
    for path in paths {
        if let Some(raw) = str_at(value, path) {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
                return parsed.with_timezone(&Utc);
            }
        }
    }
    Utc::now()
}

/// Normalize one payload for `provider`.
pub fn normalize(
    provider: CiProvider,
    payload: &Value,
    correlation_id: Option<&str>,
) -> Result<NormalizeOutcome, NormalizeError> {
    match provider {
        CiProvider::Github => normalize_github(payload, correlation_id),
        CiProvider::Gitlab => normalize_gitlab(payload, correlation_id),
        CiProvider::Circleci => normalize_circleci(payload, correlation_id),
        CiProvider::Jenkins => normalize_jenkins(payload, correlation_id),
        CiProvider::AzureDevops => normalize_azure(payload, correlation_id),
    }
}

fn accepted(event: NormalizedPipelineEvent) -> Result<NormalizeOutcome, NormalizeError> {
    Ok(NormalizeOutcome::Accepted(Box::new(event)))
}

fn ignored(reason: impl Into<String>) -> Result<NormalizeOutcome, NormalizeError> {
    Ok(NormalizeOutcome::Ignored(reason.into()))
}

fn normalize_github(
    payload: &Value,
    correlation_id: Option<&str>,
) -> Result<NormalizeOutcome, NormalizeError> {
    let Some(job) = payload.get("workflow_job") else {
        return ignored("Event type is not processed (only workflow_job)");
    };

    let action = str_at(payload, &["action"]).unwrap_or("");
    if action != "completed" {
        return ignored(format!(
            "Job action '{action}' is not processed (only 'completed')"
        ));
    }

    let conclusion = str_at(job, &["conclusion"]).unwrap_or("");
    if !matches!(conclusion, "failure" | "timed_out" | "cancelled") {
        return ignored(format!("Job conclusion '{conclusion}' is not a failure"));
    }

    let repo = str_at(payload, &["repository", "full_name"])
        .ok_or_else(|| NormalizeError("repository.full_name missing".into()))?;
    let run_id = u64_at(job, &["run_id"])
        .ok_or_else(|| NormalizeError("workflow_job.run_id missing".into()))?;
    let job_id = u64_at(job, &["id"])
        .ok_or_else(|| NormalizeError("workflow_job.id missing".into()))?;
    let attempt = u64_at(job, &["run_attempt"]).unwrap_or(1);
    let job_name = str_at(job, &["name"]).unwrap_or("unknown");

    // Names of failed steps stand in for an error summary
    let failed_steps: Vec<&str> = job
        .get("steps")
        .and_then(Value::as_array)
        .map(|steps| {
            steps
                .iter()
                .filter(|s| str_at(s, &["conclusion"]) == Some("failure"))
                .filter_map(|s| str_at(s, &["name"]))
                .collect()
        })
        .unwrap_or_default();
    let error_message = if failed_steps.is_empty() {
        None
    } else {
        Some(format!("Failed steps: {}", failed_steps.join(", ")))
    };

    accepted(NormalizedPipelineEvent {
        idempotency_key: NormalizedPipelineEvent::idempotency_key_for(
            CiProvider::Github,
            repo,
            &run_id.to_string(),
            &job_id.to_string(),
            attempt,
        ),
        provider: CiProvider::Github,
        pipeline_id: run_id.to_string(),
        repo: repo.to_string(),
        commit_sha: str_at(job, &["head_sha"]).unwrap_or("").to_string(),
        branch: str_at(job, &["head_branch"]).unwrap_or("").to_string(),
        stage: job_name.to_string(),
        failure_type: infer_failure_type(job_name, conclusion == "timed_out"),
        error_message,
        event_timestamp: timestamp_at(
            job,
            &[&["completed_at"], &["started_at"], &["created_at"]],
        ),
        raw_payload: payload.clone(),
        correlation_id: correlation_id.map(String::from),
    })
}

fn normalize_gitlab(
    payload: &Value,
    correlation_id: Option<&str>,
) -> Result<NormalizeOutcome, NormalizeError> {
    let kind = str_at(payload, &["object_kind"]).unwrap_or("");
    if kind != "build" {
        return ignored(format!("Event kind '{kind}' is not processed (only 'build')"));
    }

    let status = str_at(payload, &["build_status"]).unwrap_or("");
    if !matches!(status, "failed" | "canceled") {
        return ignored(format!("Build status '{status}' is not a failure"));
    }

    let repo = str_at(payload, &["project", "path_with_namespace"])
        .or_else(|| str_at(payload, &["repository", "name"]))
        .ok_or_else(|| NormalizeError("project.path_with_namespace missing".into()))?;
    let build_id = u64_at(payload, &["build_id"])
        .ok_or_else(|| NormalizeError("build_id missing".into()))?;
    let pipeline_id = u64_at(payload, &["pipeline_id"]).unwrap_or(build_id);
    let job_name = str_at(payload, &["build_name"]).unwrap_or("unknown");
    let timed_out = str_at(payload, &["build_failure_reason"]) == Some("job_execution_timeout");

    accepted(NormalizedPipelineEvent {
        idempotency_key: NormalizedPipelineEvent::idempotency_key_for(
            CiProvider::Gitlab,
            repo,
            &pipeline_id.to_string(),
            &build_id.to_string(),
            1,
        ),
        provider: CiProvider::Gitlab,
        pipeline_id: pipeline_id.to_string(),
        repo: repo.to_string(),
        commit_sha: str_at(payload, &["sha"])
            .or_else(|| str_at(payload, &["commit", "sha"]))
            .unwrap_or("")
            .to_string(),
        branch: str_at(payload, &["ref"]).unwrap_or("").to_string(),
        stage: job_name.to_string(),
        failure_type: infer_failure_type(job_name, timed_out),
        error_message: str_at(payload, &["build_failure_reason"]).map(String::from),
        event_timestamp: timestamp_at(payload, &[&["build_finished_at"], &["build_started_at"]]),
        raw_payload: payload.clone(),
        correlation_id: correlation_id.map(String::from),
    })
}

fn normalize_circleci(
    payload: &Value,
    correlation_id: Option<&str>,
) -> Result<NormalizeOutcome, NormalizeError> {
    let event_type = str_at(payload, &["type"]).unwrap_or("");
    if event_type != "job-completed" {
        return ignored(format!(
            "Event type '{event_type}' is not processed (only 'job-completed')"
        ));
    }

    let status = str_at(payload, &["job", "status"]).unwrap_or("");
    if !matches!(status, "failed" | "canceled" | "timedout") {
        return ignored(format!("Job status '{status}' is not a failure"));
    }

    let slug = str_at(payload, &["project", "slug"])
        .ok_or_else(|| NormalizeError("project.slug missing".into()))?;
    // Slugs look like `gh/owner/name`; drop the VCS prefix
    let repo = slug.splitn(2, '/').nth(1).unwrap_or(slug);
    let pipeline_id = str_at(payload, &["pipeline", "id"])
        .ok_or_else(|| NormalizeError("pipeline.id missing".into()))?;
    let job_number = u64_at(payload, &["job", "number"])
        .ok_or_else(|| NormalizeError("job.number missing".into()))?;
    let job_name = str_at(payload, &["job", "name"]).unwrap_or("unknown");

    accepted(NormalizedPipelineEvent {
        idempotency_key: NormalizedPipelineEvent::idempotency_key_for(
            CiProvider::Circleci,
            repo,
            pipeline_id,
            &job_number.to_string(),
            1,
        ),
        provider: CiProvider::Circleci,
        pipeline_id: pipeline_id.to_string(),
        repo: repo.to_string(),
        commit_sha: str_at(payload, &["pipeline", "vcs", "revision"])
            .unwrap_or("")
            .to_string(),
        branch: str_at(payload, &["pipeline", "vcs", "branch"])
            .unwrap_or("")
            .to_string(),
        stage: job_name.to_string(),
        failure_type: infer_failure_type(job_name, status == "timedout"),
        error_message: None,
        event_timestamp: timestamp_at(payload, &[&["job", "stopped_at"], &["happened_at"]]),
        raw_payload: payload.clone(),
        correlation_id: correlation_id.map(String::from),
    })
}

fn normalize_jenkins(
    payload: &Value,
    correlation_id: Option<&str>,
) -> Result<NormalizeOutcome, NormalizeError> {
    let Some(build) = payload.get("build") else {
        return ignored("Payload carries no build object");
    };

    let phase = str_at(build, &["phase"]).unwrap_or("");
    if !matches!(phase, "COMPLETED" | "FINALIZED") {
        return ignored(format!("Build phase '{phase}' is not processed"));
    }
    let status = str_at(build, &["status"]).unwrap_or("");
    if !matches!(status, "FAILURE" | "ABORTED") {
        return ignored(format!("Build status '{status}' is not a failure"));
    }

    let job_name = str_at(payload, &["name"])
        .ok_or_else(|| NormalizeError("name missing".into()))?;
    let number = u64_at(build, &["number"])
        .ok_or_else(|| NormalizeError("build.number missing".into()))?;

    accepted(NormalizedPipelineEvent {
        idempotency_key: NormalizedPipelineEvent::idempotency_key_for(
            CiProvider::Jenkins,
            job_name,
            &number.to_string(),
            &number.to_string(),
            1,
        ),
        provider: CiProvider::Jenkins,
        pipeline_id: number.to_string(),
        repo: str_at(build, &["scm", "url"])
            .map_or_else(|| job_name.to_string(), repo_from_git_url),
        commit_sha: str_at(build, &["scm", "commit"]).unwrap_or("").to_string(),
        branch: str_at(build, &["scm", "branch"])
            .map(|b| b.trim_start_matches("origin/").to_string())
            .unwrap_or_default(),
        stage: job_name.to_string(),
        failure_type: infer_failure_type(job_name, false),
        error_message: None,
        event_timestamp: Utc::now(),
        raw_payload: payload.clone(),
        correlation_id: correlation_id.map(String::from),
    })
}

fn normalize_azure(
    payload: &Value,
    correlation_id: Option<&str>,
) -> Result<NormalizeOutcome, NormalizeError> {
    let event_type = str_at(payload, &["eventType"]).unwrap_or("");
    if event_type != "build.complete" {
        return ignored(format!(
            "Event type '{event_type}' is not processed (only 'build.complete')"
        ));
    }

    let result = str_at(payload, &["resource", "result"]).unwrap_or("");
    if !matches!(result, "failed" | "canceled") {
        return ignored(format!("Build result '{result}' is not a failure"));
    }

    let resource = payload
        .get("resource")
        .ok_or_else(|| NormalizeError("resource missing".into()))?;
    let build_id = u64_at(resource, &["id"])
        .ok_or_else(|| NormalizeError("resource.id missing".into()))?;
    let repo = str_at(resource, &["repository", "name"])
        .or_else(|| str_at(resource, &["project", "name"]))
        .ok_or_else(|| NormalizeError("resource.repository.name missing".into()))?;
    let definition = str_at(resource, &["definition", "name"]).unwrap_or("unknown");

    accepted(NormalizedPipelineEvent {
        idempotency_key: NormalizedPipelineEvent::idempotency_key_for(
            CiProvider::AzureDevops,
            repo,
            &build_id.to_string(),
            &build_id.to_string(),
            1,
        ),
        provider: CiProvider::AzureDevops,
        pipeline_id: build_id.to_string(),
        repo: repo.to_string(),
        commit_sha: str_at(resource, &["sourceVersion"]).unwrap_or("").to_string(),
        branch: str_at(resource, &["sourceBranch"])
            .map(|b| b.trim_start_matches("refs/heads/").to_string())
            .unwrap_or_default(),
        stage: definition.to_string(),
        failure_type: infer_failure_type(definition, false),
        error_message: None,
        event_timestamp: timestamp_at(resource, &[&["finishTime"], &["startTime"]]),
        raw_payload: payload.clone(),
        correlation_id: correlation_id.map(String::from),
    })
}

fn repo_from_git_url(url: &str) -> String {
    url.trim_end_matches(".git")
        .rsplit('/')
        .take(2)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect::<Vec<_>>()
        .join("/")
}
