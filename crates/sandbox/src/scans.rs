//! Security scans over the patched working tree.
//!
//! gitleaks scans the tree for committed secrets, trivy scans dependencies
//! for known vulnerabilities, and syft emits a CycloneDX SBOM. Each scanner
//! is optional: a missing binary yields a `skipped` result, never an error.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use schemas::{SbomInfo, ScanResult, ScanStatus, ScanSummary};

const SCAN_TIMEOUT: Duration = Duration::from_secs(120);

async fn run_tool(program: &str, args: &[&str], cwd: &Path) -> Option<std::process::Output> {
    let spawn = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();
    match tokio::time::timeout(SCAN_TIMEOUT, spawn).await {
        Ok(Ok(output)) => Some(output),
        Ok(Err(e)) => {
            debug!(program, error = %e, "Scanner not available");
            None
        }
        Err(_) => {
            warn!(program, "Scanner timed out");
            None
        }
    }
}

/// Run gitleaks against the working tree.
pub async fn run_gitleaks(repo_path: &Path) -> ScanResult {
    let Some(output) = run_tool(
        "gitleaks",
        &[
            "detect",
            "--no-git",
            "--report-format",
            "json",
            "--report-path",
            "/dev/stdout",
            "--exit-code",
            "2",
        ],
        repo_path,
    )
    .await
    else {
        return ScanResult::skipped();
    };

    let findings: Vec<Value> =
        serde_json::from_slice(&output.stdout).unwrap_or_default();
    let findings_count = findings.len() as u64;
    let status = match output.status.code() {
        Some(0) => ScanStatus::Pass,
        Some(2) => ScanStatus::Fail,
        _ => ScanStatus::Error,
    };
    ScanResult {
        status,
        findings_count,
        severity_counts: BTreeMap::new(),
        error_message: if status == ScanStatus::Error {
            Some(String::from_utf8_lossy(&output.stderr).into_owned())
        } else {
            None
        },
    }
}

/// Run trivy filesystem scan over dependency manifests.
pub async fn run_trivy(repo_path: &Path) -> ScanResult {
    let Some(output) = run_tool(
        "trivy",
        &[
            "fs",
            "--quiet",
            "--format",
            "json",
            "--scanners",
            "vuln",
            ".",
        ],
        repo_path,
    )
    .await
    else {
        return ScanResult::skipped();
    };

    if !output.status.success() {
        return ScanResult {
            status: ScanStatus::Error,
            findings_count: 0,
            severity_counts: BTreeMap::new(),
            error_message: Some(String::from_utf8_lossy(&output.stderr).into_owned()),
        };
    }

    let report: Value = serde_json::from_slice(&output.stdout).unwrap_or(Value::Null);
    let mut severity_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut findings_count = 0;
    if let Some(results) = report.get("Results").and_then(Value::as_array) {
        for result in results {
            if let Some(vulns) = result.get("Vulnerabilities").and_then(Value::as_array) {
                for vuln in vulns {
                    findings_count += 1;
                    let severity = vuln
                        .get("Severity")
                        .and_then(Value::as_str)
                        .unwrap_or("UNKNOWN")
                        .to_uppercase();
                    *severity_counts.entry(severity).or_insert(0) += 1;
                }
            }
        }
    }

    let blocking = severity_counts.get("CRITICAL").copied().unwrap_or(0)
        + severity_counts.get("HIGH").copied().unwrap_or(0);
    ScanResult {
        status: if blocking > 0 {
            ScanStatus::Fail
        } else {
            ScanStatus::Pass
        },
        findings_count,
        severity_counts,
        error_message: None,
    }
}

/// Emit a CycloneDX SBOM with syft, when available.
pub async fn emit_sbom(repo_path: &Path) -> Option<SbomInfo> {
    let output = run_tool("syft", &[".", "-o", "cyclonedx-json"], repo_path).await?;
    if !output.status.success() || output.stdout.is_empty() {
        return None;
    }

    let sbom_path = repo_path.join("sbom.cdx.json");
    if let Err(e) = std::fs::write(&sbom_path, &output.stdout) {
        warn!(error = %e, "Failed to write SBOM");
        return None;
    }
    let mut hasher = Sha256::new();
    hasher.update(&output.stdout);
    Some(SbomInfo {
        path: sbom_path.to_string_lossy().into_owned(),
        sha256: hex::encode(hasher.finalize()),
        size_bytes: output.stdout.len() as u64,
    })
}

/// Run every scanner and collect the summary.
pub async fn run_all(repo_path: &Path) -> ScanSummary {
    ScanSummary {
        gitleaks: Some(run_gitleaks(repo_path).await),
        trivy: Some(run_trivy(repo_path).await),
        sbom: emit_sbom(repo_path).await,
    }
}
