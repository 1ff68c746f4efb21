//! Test framework detection and result parsing.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use schemas::ValidationStep;

static PYTEST_SUMMARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) (passed|failed|skipped|error)").unwrap());
static JEST_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Tests:\s+(?:(\d+) failed, )?(?:(\d+) skipped, )?(\d+) passed, (\d+) total")
        .unwrap()
});
static GO_FAIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^--- FAIL: ").unwrap());
static GO_PASS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^--- PASS: ").unwrap());
static MAVEN_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Tests run: (\d+), Failures: (\d+), Errors: (\d+), Skipped: (\d+)").unwrap()
});

/// Parsed test counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestCounts {
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl TestCounts {
    /// Total tests observed.
    #[must_use]
    pub fn total(self) -> u64 {
        self.passed + self.failed + self.skipped
    }
}

/// Detect the test framework from the repository layout.
#[must_use]
pub fn detect_framework(repo_path: &Path) -> Option<&'static str> {
    let has = |name: &str| repo_path.join(name).exists();

    if has("pytest.ini") || has("pyproject.toml") || has("setup.py") || has("requirements.txt") {
        return Some("pytest");
    }
    if has("package.json") {
        let content = std::fs::read_to_string(repo_path.join("package.json")).unwrap_or_default();
        if content.contains("\"mocha\"") {
            return Some("mocha");
        }
        return Some("jest");
    }
    if has("go.mod") {
        return Some("go_test");
    }
    if has("pom.xml") {
        return Some("maven");
    }
    if has("build.gradle") || has("build.gradle.kts") {
        return Some("gradle");
    }
    if has("Cargo.toml") {
        return Some("cargo");
    }
    if has("Gemfile") || has(".rspec") {
        return Some("rspec");
    }
    None
}

/// Default install/test steps for a detected framework.
#[must_use]
pub fn framework_steps(framework: &str) -> Vec<ValidationStep> {
    match framework {
        "pytest" => vec![
            ValidationStep::new("install", &["pip", "install", "-e", "."], 300),
            ValidationStep::new("test", &["python", "-m", "pytest", "-x", "-q"], 600),
        ],
        "jest" => vec![
            ValidationStep::new("install", &["npm", "install"], 600),
            ValidationStep::new("test", &["npx", "jest", "--ci"], 600),
        ],
        "mocha" => vec![
            ValidationStep::new("install", &["npm", "install"], 600),
            ValidationStep::new("test", &["npx", "mocha"], 600),
        ],
        "go_test" => vec![
            ValidationStep::new("install", &["go", "mod", "download"], 300),
            ValidationStep::new("test", &["go", "test", "./..."], 600),
        ],
        "maven" => vec![ValidationStep::new("test", &["mvn", "-q", "-B", "test"], 900)],
        "gradle" => vec![ValidationStep::new("test", &["gradle", "test"], 900)],
        "cargo" => vec![ValidationStep::new("test", &["cargo", "test"], 900)],
        "rspec" => vec![
            ValidationStep::new("install", &["bundle", "install"], 600),
            ValidationStep::new("test", &["bundle", "exec", "rspec"], 600),
        ],
        _ => vec![],
    }
}

/// Default image for a detected framework.
#[must_use]
pub fn framework_image(framework: &str) -> &'static str {
    match framework {
        "pytest" => "python:3.11-slim",
        "jest" | "mocha" => "node:20-slim",
        "go_test" => "golang:1.22",
        "maven" | "gradle" => "eclipse-temurin:21",
        "cargo" => "rust:1.79-slim",
        "rspec" => "ruby:3.3-slim",
        _ => "ubuntu:22.04",
    }
}

/// Extract test counts from framework output.
#[must_use]
pub fn parse_test_counts(framework: &str, output: &str) -> TestCounts {
    match framework {
        "pytest" => {
            let mut counts = TestCounts::default();
            for caps in PYTEST_SUMMARY.captures_iter(output) {
                let n: u64 = caps[1].parse().unwrap_or(0);
                match &caps[2] {
                    "passed" => counts.passed += n,
                    "failed" | "error" => counts.failed += n,
                    "skipped" => counts.skipped += n,
                    _ => {}
                }
            }
            counts
        }
        "jest" | "mocha" => {
            if let Some(caps) = JEST_SUMMARY.captures(output) {
                TestCounts {
                    failed: caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0),
                    skipped: caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0),
                    passed: caps.get(3).and_then(|m| m.as_str().parse().ok()).unwrap_or(0),
                }
            } else {
                TestCounts::default()
            }
        }
        "go_test" => TestCounts {
            passed: GO_PASS.find_iter(output).count() as u64,
            failed: GO_FAIL.find_iter(output).count() as u64,
            skipped: 0,
        },
        "maven" | "gradle" => {
            if let Some(caps) = MAVEN_SUMMARY.captures(output) {
                let run: u64 = caps[1].parse().unwrap_or(0);
                let failures: u64 = caps[2].parse().unwrap_or(0);
                let errors: u64 = caps[3].parse().unwrap_or(0);
                let skipped: u64 = caps[4].parse().unwrap_or(0);
                TestCounts {
                    passed: run.saturating_sub(failures + errors + skipped),
                    failed: failures + errors,
                    skipped,
                }
            } else {
                TestCounts::default()
            }
        }
        _ => TestCounts::default(),
    }
}
