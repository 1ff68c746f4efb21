//! Unified diff parsing and measurement.
//!
//! Every component that needs to know how big a diff is or which files it
//! touches goes through [`parse_unified_diff`]; nothing else counts lines.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the diff parser.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffError {
    /// Required headers are missing or out of order.
    #[error("malformed diff: {0}")]
    MalformedDiff(String),
}

/// One file touched by a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDiffFile {
    /// Normalized path (no `a/`/`b/`/`./` prefix, `/` separators)
    pub path: String,
    /// Added lines in this file's hunks
    pub lines_added: u64,
    /// Removed lines in this file's hunks
    pub lines_removed: u64,
}

/// A measured diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDiff {
    /// Files in order of appearance
    pub files: Vec<ParsedDiffFile>,
    /// Number of files touched
    pub total_files: u64,
    /// Total added lines
    pub total_lines_added: u64,
    /// Total removed lines
    pub total_lines_removed: u64,
    /// Diff size in bytes
    pub diff_bytes: u64,
}

impl ParsedDiff {
    /// Paths of every touched file.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }
}

/// Strip `./`, `a/`, `b/` prefixes and normalize separators.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let mut normalized = path.replace('\\', "/");
    if let Some(rest) = normalized.strip_prefix("./") {
        normalized = rest.to_string();
    }
    if let Some(rest) = normalized
        .strip_prefix("a/")
        .or_else(|| normalized.strip_prefix("b/"))
    {
        normalized = rest.to_string();
    }
    normalized
}

fn header_path(line: &str, marker: &str) -> String {
    let raw = line[marker.len()..].trim();
    // `--- a/path<TAB>timestamp` is legal unified-diff syntax
    let raw = raw.split('\t').next().unwrap_or(raw);
    normalize_path(raw)
}

/// Parse a unified diff, measuring files, lines, and bytes.
///
/// Line counters exclude the `---`/`+++` header lines. Fails with
/// [`DiffError::MalformedDiff`] when the `---`/`+++`/`@@` structure is
/// absent or mis-ordered.
pub fn parse_unified_diff(diff_text: &str) -> Result<ParsedDiff, DiffError> {
    if diff_text.trim().is_empty() {
        return Err(DiffError::MalformedDiff("empty diff".to_string()));
    }

    let mut files: Vec<ParsedDiffFile> = Vec::new();
    let mut current: Option<ParsedDiffFile> = None;
    let mut pending_old: Option<String> = None;
    let mut saw_hunk_for_current = false;

    for line in diff_text.lines() {
        if let Some(stripped) = line.strip_prefix("--- ") {
            let _ = stripped;
            if current.is_some() && !saw_hunk_for_current {
                return Err(DiffError::MalformedDiff(
                    "file header without any @@ hunk".to_string(),
                ));
            }
            if let Some(done) = current.take() {
                files.push(done);
            }
            pending_old = Some(header_path(line, "--- "));
            saw_hunk_for_current = false;
        } else if line.starts_with("+++ ") {
            let Some(old_path) = pending_old.take() else {
                return Err(DiffError::MalformedDiff(
                    "`+++` header without preceding `---`".to_string(),
                ));
            };
            let new_path = header_path(line, "+++ ");
            // Prefer the post-image path unless the file was deleted
            let path = if new_path == "/dev/null" {
                old_path
            } else {
                new_path
            };
            current = Some(ParsedDiffFile {
                path,
                lines_added: 0,
                lines_removed: 0,
            });
        } else if line.starts_with("@@") {
            if current.is_none() {
                return Err(DiffError::MalformedDiff(
                    "`@@` hunk before any file header".to_string(),
                ));
            }
            saw_hunk_for_current = true;
        } else if let Some(file) = current.as_mut() {
            if !saw_hunk_for_current {
                continue;
            }
            if line.starts_with('+') {
                file.lines_added += 1;
            } else if line.starts_with('-') {
                file.lines_removed += 1;
            }
        }
    }

    if pending_old.is_some() {
        return Err(DiffError::MalformedDiff(
            "`---` header without `+++`".to_string(),
        ));
    }
    if let Some(done) = current.take() {
        if !saw_hunk_for_current {
            return Err(DiffError::MalformedDiff(
                "file header without any @@ hunk".to_string(),
            ));
        }
        files.push(done);
    }
    if files.is_empty() {
        return Err(DiffError::MalformedDiff(
            "no `---`/`+++` file headers found".to_string(),
        ));
    }

    let total_lines_added = files.iter().map(|f| f.lines_added).sum();
    let total_lines_removed = files.iter().map(|f| f.lines_removed).sum();
    Ok(ParsedDiff {
        total_files: files.len() as u64,
        total_lines_added,
        total_lines_removed,
        diff_bytes: diff_text.len() as u64,
        files,
    })
}
