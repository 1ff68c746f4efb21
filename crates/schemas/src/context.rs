//! Failure context bundles.
//!
//! Everything the pipeline knows about one failure before planning starts:
//! raw log content (possibly truncated), parsed errors/traces/test failures,
//! changed files, and commit metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default ceiling on raw log bytes retained in a context bundle.
pub const MAX_LOG_BYTES: usize = 10 * 1024 * 1024;

/// Source language of a stack trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLanguage {
    Python,
    Javascript,
    Java,
    Go,
    Unknown,
}

/// Severity of an extracted error line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Error,
    Warning,
}

/// One frame of a stack trace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackFrame {
    /// Source file path as reported by the runtime
    pub file: Option<String>,
    /// Line number
    pub line: Option<u32>,
    /// Column number (JS only)
    pub column: Option<u32>,
    /// Function or method name
    pub function: Option<String>,
    /// Enclosing module/package (Java)
    pub module: Option<String>,
    /// The source line, when the log echoes it
    pub code: Option<String>,
}

/// A parsed stack trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackTrace {
    /// Language the trace was parsed as
    pub language: LogLanguage,
    /// Exception/panic type
    pub exception_type: String,
    /// Exception message
    pub message: String,
    /// Frames, outermost first
    pub frames: Vec<StackFrame>,
    /// Verbatim text of the trace
    pub raw_text: String,
    /// Whether this trace is the root cause within its chain.
    /// For chained Java exceptions, only the last trace carries the flag.
    #[serde(default)]
    pub is_root_cause: bool,
}

/// A generic error line with surrounding context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error kind label (currently always "generic")
    pub error_type: String,
    /// Error message with the level prefix stripped
    pub message: String,
    /// Severity of the matched line
    pub severity: Severity,
    /// A few lines around the match
    #[serde(default)]
    pub context_lines: Vec<String>,
}

/// A failed test extracted from framework output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestFailure {
    /// Test file, when the framework reports one
    pub test_file: Option<String>,
    /// Test class/suite
    pub test_class: Option<String>,
    /// Test name
    pub test_name: Option<String>,
    /// Failure output following the marker line
    pub error_message: String,
    /// Test duration in seconds, when reported
    pub duration_seconds: Option<f64>,
}

/// A compiler/build error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildError {
    /// Source file ("" when the toolchain reports errors across lines)
    pub file: String,
    /// Line number
    pub line: Option<u32>,
    /// Column number
    pub column: Option<u32>,
    /// Toolchain error code (e.g. `E0382`)
    pub error_code: Option<String>,
    /// Severity
    pub severity: Severity,
    /// Error message
    pub message: String,
}

impl BuildError {
    /// Build error with only a code and message (Rust-style diagnostics).
    #[must_use]
    pub fn coded(code: &str, message: &str) -> Self {
        Self {
            file: String::new(),
            line: None,
            column: None,
            error_code: Some(code.to_string()),
            severity: Severity::Error,
            message: message.to_string(),
        }
    }
}

/// Raw log content with truncation bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogContent {
    /// The (possibly truncated) log text
    pub raw_content: String,
    /// Whether the byte ceiling truncated the original
    pub truncated: bool,
    /// Size in bytes of the retained text
    pub size_bytes: usize,
    /// Job the log belongs to
    pub job_name: Option<String>,
}

impl LogContent {
    /// Retain at most `max_bytes` of `content`, cutting at a char boundary.
    #[must_use]
    pub fn capped(content: &str, max_bytes: usize, job_name: Option<String>) -> Self {
        if content.len() <= max_bytes {
            return Self {
                raw_content: content.to_string(),
                truncated: false,
                size_bytes: content.len(),
                job_name,
            };
        }
        let mut cut = max_bytes;
        while cut > 0 && !content.is_char_boundary(cut) {
            cut -= 1;
        }
        Self {
            raw_content: content[..cut].to_string(),
            truncated: true,
            size_bytes: cut,
            job_name,
        }
    }
}

/// A file changed in the failing commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangedFile {
    /// File path
    pub filename: String,
    /// Change status (added, modified, deleted, renamed)
    pub status: String,
    /// Lines added
    pub additions: u32,
    /// Lines deleted
    pub deletions: u32,
}

/// Duration of a single pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTiming {
    /// Step name
    pub name: String,
    /// Step duration in seconds
    pub duration_seconds: f64,
    /// Step conclusion as reported by the provider
    pub conclusion: Option<String>,
}

/// Aggregated observability artifacts for one failure event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureContextBundle {
    /// Event this context belongs to
    pub event_id: Uuid,
    /// Repository in `owner/name` form
    pub repo: String,
    /// Commit SHA
    pub commit_sha: String,
    /// Branch
    pub branch: String,
    /// Provider pipeline identifier
    pub pipeline_id: String,
    /// Failed job name
    pub job_name: Option<String>,
    /// Raw log content, capped at [`MAX_LOG_BYTES`]
    pub log_content: Option<LogContent>,
    /// Parser-generated summary (first 10 + last 20 lines + counts)
    pub log_summary: Option<String>,
    /// Extracted generic error lines
    #[serde(default)]
    pub errors: Vec<ErrorInfo>,
    /// Extracted stack traces
    #[serde(default)]
    pub stack_traces: Vec<StackTrace>,
    /// Extracted test failures
    #[serde(default)]
    pub test_failures: Vec<TestFailure>,
    /// Extracted build errors
    #[serde(default)]
    pub build_errors: Vec<BuildError>,
    /// Files changed in the failing commit
    #[serde(default)]
    pub changed_files: Vec<ChangedFile>,
    /// Commit message
    pub commit_message: Option<String>,
    /// Total pipeline execution time in seconds
    pub execution_time_seconds: Option<f64>,
    /// Per-step timings
    #[serde(default)]
    pub step_timings: Vec<StepTiming>,
    /// When the bundle was assembled
    pub built_at: DateTime<Utc>,
}

impl FailureContextBundle {
    /// The raw log text when present, otherwise the summary, otherwise "".
    #[must_use]
    pub fn log_text(&self) -> &str {
        if let Some(content) = &self.log_content {
            return &content.raw_content;
        }
        self.log_summary.as_deref().unwrap_or("")
    }

    /// The root-cause stack trace, when one was marked.
    #[must_use]
    pub fn root_cause_trace(&self) -> Option<&StackTrace> {
        self.stack_traces
            .iter()
            .find(|t| t.is_root_cause)
            .or_else(|| self.stack_traces.first())
    }

    /// Filenames of changed files, for adapter selection hints.
    #[must_use]
    pub fn changed_filenames(&self) -> Vec<String> {
        self.changed_files
            .iter()
            .map(|f| f.filename.clone())
            .collect()
    }
}
