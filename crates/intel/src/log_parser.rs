//! CI log parsing.
//!
//! Extracts actionable information from raw CI logs:
//! - Python tracebacks
//! - JavaScript/Node.js errors with stack frames
//! - Java exception chains (with `Caused by:` collapsed)
//! - Go panic blocks
//! - Test failures (pytest, Jest/Mocha, JUnit, `go test`)
//! - Build errors (GCC/Clang, Rust, npm)
//!
//! The parser is pure: the same input always yields the same output.

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use schemas::{
    BuildError, ErrorInfo, LogLanguage, Severity, StackFrame, StackTrace, TestFailure,
};

static PYTHON_TRACEBACK_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Traceback \(most recent call last\):").unwrap());
static PYTHON_FRAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*File "([^"]+)", line (\d+), in (\w+)"#).unwrap());
static PYTHON_EXCEPTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+(?:\.\w+)*(?:Error|Exception|Warning)): (.+)$").unwrap());

static JS_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\w*Error|\w*Exception|TypeError|ReferenceError|SyntaxError): (.+)$").unwrap()
});
static JS_STACK_FRAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+at (.+?) \(([^:]+):(\d+):(\d+)\)$").unwrap());
static JS_STACK_FRAME_SIMPLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+at ([^:]+):(\d+):(\d+)$").unwrap());

static JAVA_EXCEPTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\w.]+(?:Exception|Error)): (.+)$").unwrap());
static JAVA_FRAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+at ([\w.$]+)\((\w+\.java):(\d+)\)$").unwrap());
static JAVA_CAUSED_BY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Caused by: (.+)$").unwrap());

static GO_PANIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^panic: (.+)$").unwrap());
static GO_FRAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([^:\s]+):(\d+) \+0x[\da-f]+$").unwrap());

static PYTEST_FAILURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(FAILED|ERROR) ([\w/.-]+)::(\w+)(?:::(\w+))?").unwrap());
static JEST_FAILURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[✕✗×]\s+(.+?)(?:\s+\(\d+\s*ms\))?$").unwrap());
static JUNIT_FAILURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:FAILURE|ERROR): (\w+)\(([^)]+)\)$").unwrap());
static GO_TEST_FAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^--- FAIL: (\w+) \(([^)]+)\)$").unwrap());

static GCC_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^:\s][^:]*):(\d+):(\d+): (error|warning): (.+)$").unwrap());
static RUST_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^error\[([^\]]+)\]: (.+)$").unwrap());
static NPM_ERROR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^npm ERR! (.+)$").unwrap());

static GENERIC_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\[[^\]]+\]\s*").unwrap());
static GENERIC_PATTERNS: LazyLock<Vec<(Regex, Severity)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?i)^ERROR[:\s](.+)$").unwrap(),
            Severity::Error,
        ),
        (
            Regex::new(r"(?i)^\[ERROR\](.+)$").unwrap(),
            Severity::Error,
        ),
        (
            Regex::new(r"(?i)^FATAL[:\s](.+)$").unwrap(),
            Severity::Error,
        ),
        (
            Regex::new(r"(?i)^WARN(?:ING)?[:\s](.+)$").unwrap(),
            Severity::Warning,
        ),
    ]
});

/// Result of parsing a log.
#[derive(Debug, Clone)]
pub struct ParsedLogResult {
    /// Generic error lines
    pub errors: Vec<ErrorInfo>,
    /// Stack traces across all languages
    pub stack_traces: Vec<StackTrace>,
    /// Test failures across all frameworks
    pub test_failures: Vec<TestFailure>,
    /// Build/compile errors
    pub build_errors: Vec<BuildError>,
    /// First 10 + last 20 lines plus counts
    pub summary: String,
}

/// Multi-language, pattern-based CI log parser.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogParser;

impl LogParser {
    /// Create a parser.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Parse log content and extract all actionable information.
    #[must_use]
    pub fn parse(&self, content: &str) -> ParsedLogResult {
        let lines: Vec<&str> = content.split('\n').collect();

        let mut stack_traces = Vec::new();
        stack_traces.extend(extract_python_tracebacks(&lines));
        stack_traces.extend(extract_js_errors(&lines));
        stack_traces.extend(extract_java_exceptions(&lines));
        stack_traces.extend(extract_go_panics(&lines));

        let test_failures = extract_test_failures(&lines);
        let build_errors = extract_build_errors(&lines);
        let errors = extract_generic_errors(&lines);

        let summary = generate_summary(&lines, &errors, &stack_traces, &test_failures);

        debug!(
            errors = errors.len(),
            stack_traces = stack_traces.len(),
            test_failures = test_failures.len(),
            build_errors = build_errors.len(),
            "Parsed log content"
        );

        ParsedLogResult {
            errors,
            stack_traces,
            test_failures,
            build_errors,
            summary,
        }
    }
}

fn extract_python_tracebacks(lines: &[&str]) -> Vec<StackTrace> {
    let mut traces = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if PYTHON_TRACEBACK_START.is_match(lines[i]) {
            let mut trace_lines = vec![lines[i].to_string()];
            let mut frames: Vec<StackFrame> = Vec::new();
            i += 1;

            while i < lines.len() {
                let line = lines[i];
                if let Some(caps) = PYTHON_FRAME.captures(line) {
                    let mut frame = StackFrame {
                        file: Some(caps[1].to_string()),
                        line: caps[2].parse().ok(),
                        function: Some(caps[3].to_string()),
                        ..StackFrame::default()
                    };
                    trace_lines.push(line.to_string());
                    // The next line usually echoes the source
                    if i + 1 < lines.len() && lines[i + 1].starts_with("    ") {
                        frame.code = Some(lines[i + 1].trim().to_string());
                        trace_lines.push(lines[i + 1].to_string());
                        i += 1;
                    }
                    frames.push(frame);
                } else if let Some(caps) = PYTHON_EXCEPTION.captures(line) {
                    trace_lines.push(line.to_string());
                    traces.push(StackTrace {
                        language: LogLanguage::Python,
                        exception_type: caps[1].to_string(),
                        message: caps[2].to_string(),
                        frames: std::mem::take(&mut frames),
                        raw_text: trace_lines.join("\n"),
                        is_root_cause: traces.is_empty(),
                    });
                    break;
                } else if line.trim().is_empty() || !line.starts_with(' ') {
                    break;
                } else {
                    trace_lines.push(line.to_string());
                }
                i += 1;
            }
        }
        i += 1;
    }

    traces
}

fn extract_js_errors(lines: &[&str]) -> Vec<StackTrace> {
    let mut traces = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if let Some(caps) = JS_ERROR.captures(lines[i]) {
            let exception_type = caps[1].to_string();
            let message = caps[2].to_string();
            let mut frames: Vec<StackFrame> = Vec::new();
            let mut trace_lines = vec![lines[i].to_string()];
            i += 1;

            while i < lines.len() {
                let line = lines[i];
                if let Some(frame) = JS_STACK_FRAME.captures(line) {
                    frames.push(StackFrame {
                        function: Some(frame[1].to_string()),
                        file: Some(frame[2].to_string()),
                        line: frame[3].parse().ok(),
                        column: frame[4].parse().ok(),
                        ..StackFrame::default()
                    });
                    trace_lines.push(line.to_string());
                } else if let Some(frame) = JS_STACK_FRAME_SIMPLE.captures(line) {
                    frames.push(StackFrame {
                        file: Some(frame[1].to_string()),
                        line: frame[2].parse().ok(),
                        column: frame[3].parse().ok(),
                        ..StackFrame::default()
                    });
                    trace_lines.push(line.to_string());
                } else if line.trim_start().starts_with("at ") {
                    trace_lines.push(line.to_string());
                } else {
                    break;
                }
                i += 1;
            }

            if !frames.is_empty() {
                traces.push(StackTrace {
                    language: LogLanguage::Javascript,
                    exception_type,
                    message,
                    frames,
                    raw_text: trace_lines.join("\n"),
                    is_root_cause: traces.is_empty(),
                });
            }
            continue;
        }
        i += 1;
    }

    traces
}

fn extract_java_exceptions(lines: &[&str]) -> Vec<StackTrace> {
    let mut traces = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if let Some(caps) = JAVA_EXCEPTION.captures(lines[i]) {
            let mut exception_type = caps[1].to_string();
            let mut message = caps[2].to_string();
            let mut frames: Vec<StackFrame> = Vec::new();
            let mut trace_lines = vec![lines[i].to_string()];
            i += 1;

            while i < lines.len() {
                let line = lines[i];
                if let Some(frame) = JAVA_FRAME.captures(line) {
                    let full_method = frame[1].to_string();
                    let (module, function) = match full_method.rsplit_once('.') {
                        Some((m, f)) => (Some(m.to_string()), f.to_string()),
                        None => (None, full_method),
                    };
                    frames.push(StackFrame {
                        module,
                        function: Some(function),
                        file: Some(frame[2].to_string()),
                        line: frame[3].parse().ok(),
                        ..StackFrame::default()
                    });
                    trace_lines.push(line.to_string());
                } else if let Some(caused) = JAVA_CAUSED_BY.captures(line) {
                    // New exception in the chain: flush the current trace
                    traces.push(StackTrace {
                        language: LogLanguage::Java,
                        exception_type: exception_type.clone(),
                        message: message.clone(),
                        frames: std::mem::take(&mut frames),
                        raw_text: trace_lines.join("\n"),
                        is_root_cause: false,
                    });
                    trace_lines = vec![line.to_string()];
                    let cause = caused[1].to_string();
                    match cause.split_once(':') {
                        Some((ty, msg)) => {
                            exception_type = ty.trim().to_string();
                            message = msg.trim().to_string();
                        }
                        None => {
                            exception_type = cause;
                            message = String::new();
                        }
                    }
                } else if line.trim_start().starts_with("at ") || line.trim_start().starts_with("...")
                {
                    trace_lines.push(line.to_string());
                } else {
                    break;
                }
                i += 1;
            }

            if !frames.is_empty() {
                // The last exception in a chain is the root cause
                traces.push(StackTrace {
                    language: LogLanguage::Java,
                    exception_type,
                    message,
                    frames,
                    raw_text: trace_lines.join("\n"),
                    is_root_cause: true,
                });
            }
            continue;
        }
        i += 1;
    }

    traces
}

fn extract_go_panics(lines: &[&str]) -> Vec<StackTrace> {
    let mut traces = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if let Some(caps) = GO_PANIC.captures(lines[i]) {
            let message = caps[1].to_string();
            let mut frames: Vec<StackFrame> = Vec::new();
            let mut trace_lines = vec![lines[i].to_string()];
            i += 1;

            while i < lines.len() {
                let line = lines[i];
                let frame = GO_FRAME.captures(line);
                if frame.is_some() || line.to_lowercase().contains("goroutine") {
                    trace_lines.push(line.to_string());
                    if let Some(frame) = frame {
                        frames.push(StackFrame {
                            file: Some(frame[1].to_string()),
                            line: frame[2].parse().ok(),
                            ..StackFrame::default()
                        });
                    }
                } else if line.trim().is_empty() {
                    break;
                } else {
                    trace_lines.push(line.to_string());
                }
                i += 1;
            }

            traces.push(StackTrace {
                language: LogLanguage::Go,
                exception_type: "panic".to_string(),
                message,
                frames,
                raw_text: trace_lines.join("\n"),
                is_root_cause: true,
            });
            continue;
        }
        i += 1;
    }

    traces
}

fn extract_test_failures(lines: &[&str]) -> Vec<TestFailure> {
    let mut failures = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if let Some(caps) = PYTEST_FAILURE.captures(line) {
            failures.push(TestFailure {
                test_file: Some(caps[2].split("::").next().unwrap_or(&caps[2]).to_string()),
                test_class: Some(caps[3].to_string()),
                test_name: Some(
                    caps.get(4)
                        .map_or_else(|| caps[3].to_string(), |m| m.as_str().to_string()),
                ),
                error_message: context_after(lines, i, 5),
                duration_seconds: None,
            });
            continue;
        }

        if let Some(caps) = GO_TEST_FAIL.captures(line) {
            failures.push(TestFailure {
                test_file: None,
                test_class: None,
                test_name: Some(caps[1].to_string()),
                error_message: context_after(lines, i, 5),
                duration_seconds: parse_duration(&caps[2]),
            });
            continue;
        }

        if let Some(caps) = JUNIT_FAILURE.captures(line) {
            failures.push(TestFailure {
                test_file: None,
                test_class: Some(caps[2].to_string()),
                test_name: Some(caps[1].to_string()),
                error_message: context_after(lines, i, 5),
                duration_seconds: None,
            });
            continue;
        }

        if let Some(caps) = JEST_FAILURE.captures(line) {
            failures.push(TestFailure {
                test_file: None,
                test_class: None,
                test_name: Some(caps[1].trim().to_string()),
                error_message: context_after(lines, i, 5),
                duration_seconds: None,
            });
        }
    }

    failures
}

fn extract_build_errors(lines: &[&str]) -> Vec<BuildError> {
    let mut errors = Vec::new();

    for line in lines {
        if let Some(caps) = GCC_ERROR.captures(line) {
            errors.push(BuildError {
                file: caps[1].to_string(),
                line: caps[2].parse().ok(),
                column: caps[3].parse().ok(),
                error_code: None,
                severity: if &caps[4] == "error" {
                    Severity::Error
                } else {
                    Severity::Warning
                },
                message: caps[5].to_string(),
            });
            continue;
        }

        if let Some(caps) = RUST_ERROR.captures(line) {
            // Rust diagnostics span multiple lines; keep the code + message
            errors.push(BuildError::coded(&caps[1], &caps[2]));
            continue;
        }

        if let Some(caps) = NPM_ERROR.captures(line) {
            errors.push(BuildError {
                file: String::new(),
                line: None,
                column: None,
                error_code: None,
                severity: Severity::Error,
                message: caps[1].to_string(),
            });
        }
    }

    errors
}

fn extract_generic_errors(lines: &[&str]) -> Vec<ErrorInfo> {
    let mut errors = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let normalized = GENERIC_PREFIX.replace(line, "").trim().to_string();
        for (pattern, severity) in GENERIC_PATTERNS.iter() {
            if let Some(caps) = pattern.captures(&normalized) {
                errors.push(ErrorInfo {
                    error_type: "generic".to_string(),
                    message: caps[1].trim().to_string(),
                    severity: *severity,
                    context_lines: context_around(lines, i, 2, 2),
                });
                break;
            }
        }
    }

    errors
}

fn context_after(lines: &[&str], index: usize, after: usize) -> String {
    let end = (index + after + 1).min(lines.len());
    lines[index..end].join("\n")
}

fn context_around(lines: &[&str], index: usize, before: usize, after: usize) -> Vec<String> {
    let start = index.saturating_sub(before);
    let end = (index + after + 1).min(lines.len());
    lines[start..end].iter().map(|l| (*l).to_string()).collect()
}

fn parse_duration(raw: &str) -> Option<f64> {
    raw.trim_end_matches('s').parse().ok()
}

fn generate_summary(
    lines: &[&str],
    errors: &[ErrorInfo],
    stack_traces: &[StackTrace],
    test_failures: &[TestFailure],
) -> String {
    let mut parts: Vec<String> = Vec::new();

    parts.push("=== First 10 lines ===".to_string());
    parts.extend(lines.iter().take(10).map(|l| (*l).to_string()));

    parts.push("\n=== Last 20 lines ===".to_string());
    let tail_start = lines.len().saturating_sub(20);
    parts.extend(lines[tail_start..].iter().map(|l| (*l).to_string()));

    parts.push("\n=== Stats ===".to_string());
    parts.push(format!("Total lines: {}", lines.len()));
    parts.push(format!("Errors found: {}", errors.len()));
    parts.push(format!("Stack traces: {}", stack_traces.len()));
    parts.push(format!("Test failures: {}", test_failures.len()));

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYTHON_LOG: &str = r#"Collecting dependencies
Traceback (most recent call last):
  File "/app/src/main.py", line 12, in <module>
    import requests
ModuleNotFoundError: No module named 'requests'
Process exited with code 1"#;

    #[test]
    fn test_python_traceback() {
        let result = LogParser::new().parse(PYTHON_LOG);
        assert_eq!(result.stack_traces.len(), 1);
        let trace = &result.stack_traces[0];
        assert_eq!(trace.language, LogLanguage::Python);
        assert_eq!(trace.exception_type, "ModuleNotFoundError");
        assert_eq!(trace.message, "No module named 'requests'");
        assert_eq!(trace.frames.len(), 1);
        assert_eq!(trace.frames[0].file.as_deref(), Some("/app/src/main.py"));
        assert_eq!(trace.frames[0].line, Some(12));
        assert!(trace.is_root_cause);
    }

    #[test]
    fn test_js_error_with_frames() {
        let log = "TypeError: Cannot read properties of undefined (reading 'id')\n    at handler (/app/src/index.js:42:13)\n    at /app/src/router.js:8:5\ndone";
        let result = LogParser::new().parse(log);
        assert_eq!(result.stack_traces.len(), 1);
        let trace = &result.stack_traces[0];
        assert_eq!(trace.language, LogLanguage::Javascript);
        assert_eq!(trace.frames.len(), 2);
        assert_eq!(trace.frames[0].function.as_deref(), Some("handler"));
        assert_eq!(trace.frames[1].line, Some(8));
    }

    #[test]
    fn test_java_caused_by_chain() {
        let log = "\
java.lang.RuntimeException: wrapper failed
	at com.acme.App.run(App.java:10)
Caused by: java.lang.NullPointerException: actual cause
	at com.acme.Service.load(Service.java:55)
";
        let result = LogParser::new().parse(log);
        assert_eq!(result.stack_traces.len(), 2);
        assert!(!result.stack_traces[0].is_root_cause);
        let root = &result.stack_traces[1];
        assert!(root.is_root_cause);
        assert_eq!(root.exception_type, "java.lang.NullPointerException");
        assert_eq!(root.frames[0].file.as_deref(), Some("Service.java"));
        assert_eq!(root.frames[0].module.as_deref(), Some("com.acme.Service"));
    }

    #[test]
    fn test_go_panic() {
        let log = "\
panic: runtime error: index out of range [3] with length 2

goroutine 1 [running]:
main.main()
	/app/main.go:14 +0x1d
exit status 2";
        let result = LogParser::new().parse(log);
        assert_eq!(result.stack_traces.len(), 1);
        let trace = &result.stack_traces[0];
        assert_eq!(trace.language, LogLanguage::Go);
        assert_eq!(trace.exception_type, "panic");
        assert!(trace.is_root_cause);
    }

    #[test]
    fn test_pytest_failure() {
        let log = "FAILED tests/test_api.py::TestApi::test_get\nAssertionError: expected 200";
        let result = LogParser::new().parse(log);
        assert_eq!(result.test_failures.len(), 1);
        let failure = &result.test_failures[0];
        assert_eq!(failure.test_file.as_deref(), Some("tests/test_api.py"));
        assert_eq!(failure.test_class.as_deref(), Some("TestApi"));
        assert_eq!(failure.test_name.as_deref(), Some("test_get"));
        assert!(failure.error_message.contains("AssertionError"));
    }

    #[test]
    fn test_go_test_failure_with_duration() {
        let log = "--- FAIL: TestCheckout (0.12s)\n    checkout_test.go:33: got 404";
        let result = LogParser::new().parse(log);
        assert_eq!(result.test_failures.len(), 1);
        assert_eq!(result.test_failures[0].test_name.as_deref(), Some("TestCheckout"));
        assert_eq!(result.test_failures[0].duration_seconds, Some(0.12));
    }

    #[test]
    fn test_build_errors() {
        let log = "\
src/app.c:10:5: error: unknown type name 'strr'
error[E0382]: borrow of moved value: `x`
npm ERR! peer dep missing: react@^18
";
        let result = LogParser::new().parse(log);
        assert_eq!(result.build_errors.len(), 3);
        assert_eq!(result.build_errors[0].file, "src/app.c");
        assert_eq!(result.build_errors[1].error_code.as_deref(), Some("E0382"));
        assert!(result.build_errors[2].message.contains("peer dep"));
    }

    #[test]
    fn test_generic_errors_with_prefix() {
        let log = "[2024-05-01T10:00:00Z] ERROR: database connection refused\nall good";
        let result = LogParser::new().parse(log);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].message, "database connection refused");
        assert_eq!(result.errors[0].severity, Severity::Error);
    }

    #[test]
    fn test_summary_contains_stats() {
        let result = LogParser::new().parse(PYTHON_LOG);
        assert!(result.summary.contains("=== First 10 lines ==="));
        assert!(result.summary.contains("=== Last 20 lines ==="));
        assert!(result.summary.contains("Stack traces: 1"));
    }

    #[test]
    fn test_parser_is_pure() {
        let parser = LogParser::new();
        let a = parser.parse(PYTHON_LOG);
        let b = parser.parse(PYTHON_LOG);
        assert_eq!(a.summary, b.summary);
        assert_eq!(a.stack_traces.len(), b.stack_traces.len());
        assert_eq!(a.errors.len(), b.errors.len());
    }
}
