//! Rule-based failure classification.
//!
//! A static rule table maps log/error text to a [`FailureCategory`] with a
//! per-rule confidence. The highest-confidence matching rule wins; a second
//! matching rule with a different category becomes the secondary category.

use regex::Regex;
use tracing::info;

use schemas::{Classification, FailureCategory, FailureContextBundle};

/// Upper bound on raw log bytes fed into classification.
const CLASSIFY_LOG_TAIL_BYTES: usize = 10 * 1024;

struct ClassificationRule {
    name: &'static str,
    category: FailureCategory,
    patterns: Vec<Regex>,
    confidence: f64,
    reason: &'static str,
}

impl ClassificationRule {
    fn new(
        name: &'static str,
        category: FailureCategory,
        patterns: &[&str],
        confidence: f64,
        reason: &'static str,
    ) -> Self {
        Self {
            name,
            category,
            patterns: patterns
                .iter()
                .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
                .collect(),
            confidence,
            reason,
        }
    }

    fn matches(&self, text: &str) -> Vec<String> {
        self.patterns
            .iter()
            .filter(|p| p.is_match(text))
            .map(|p| p.as_str().to_string())
            .collect()
    }
}

/// Rule-based classifier over failure context bundles.
pub struct FailureClassifier {
    rules: Vec<ClassificationRule>,
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl FailureClassifier {
    /// Build the classifier with the standard rule set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: build_rules(),
        }
    }

    /// Classify a failure based on its context.
    #[must_use]
    pub fn classify(&self, context: &FailureContextBundle) -> Classification {
        let search_text = build_search_text(context);
        self.classify_text(&search_text)
    }

    /// Classify raw text directly (offline/eval path).
    #[must_use]
    pub fn classify_text(&self, search_text: &str) -> Classification {
        let mut matches: Vec<(&ClassificationRule, Vec<String>)> = self
            .rules
            .iter()
            .filter_map(|rule| {
                let matched = rule.matches(search_text);
                if matched.is_empty() {
                    None
                } else {
                    Some((rule, matched))
                }
            })
            .collect();

        if matches.is_empty() {
            return Classification::unknown();
        }

        // Stable sort: ties keep rule-table order
        matches.sort_by(|a, b| {
            b.0.confidence
                .partial_cmp(&a.0.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // A timeout match forces FLAKY unless an explicit infrastructure
        // rule also matched.
        let timeout_hit = matches.iter().any(|(r, _)| r.name == "timeout");
        let infra_hit = matches
            .iter()
            .any(|(r, _)| r.category == FailureCategory::Infrastructure);
        if timeout_hit && !infra_hit {
            let (timeout_rule, indicators) = matches
                .iter()
                .find(|(r, _)| r.name == "timeout")
                .expect("timeout rule matched");
            let secondary = matches
                .iter()
                .find(|(r, _)| r.category != FailureCategory::Flaky)
                .map(|(r, _)| r.category);
            return Classification {
                category: FailureCategory::Flaky,
                confidence: timeout_rule.confidence,
                reasoning: timeout_rule.reason.to_string(),
                indicators: indicators.clone(),
                secondary_category: secondary,
            };
        }

        let (best_rule, indicators) = &matches[0];
        let secondary = matches
            .iter()
            .skip(1)
            .find(|(r, _)| r.category != best_rule.category)
            .map(|(r, _)| r.category);

        info!(
            category = best_rule.category.name(),
            confidence = best_rule.confidence,
            rule = best_rule.name,
            "Classified failure"
        );

        Classification {
            category: best_rule.category,
            confidence: best_rule.confidence,
            reasoning: best_rule.reason.to_string(),
            indicators: indicators.clone(),
            secondary_category: secondary,
        }
    }
}

fn build_search_text(context: &FailureContextBundle) -> String {
    let mut parts: Vec<String> = Vec::new();

    for error in &context.errors {
        parts.push(error.message.clone());
    }
    for trace in &context.stack_traces {
        parts.push(format!("{}: {}", trace.exception_type, trace.message));
    }
    for failure in &context.test_failures {
        parts.push(failure.error_message.clone());
    }
    for error in &context.build_errors {
        parts.push(error.message.clone());
    }
    if let Some(summary) = &context.log_summary {
        parts.push(summary.clone());
    }
    if let Some(content) = &context.log_content {
        let raw = &content.raw_content;
        let mut start = raw.len().saturating_sub(CLASSIFY_LOG_TAIL_BYTES);
        while start < raw.len() && !raw.is_char_boundary(start) {
            start += 1;
        }
        parts.push(raw[start..].to_string());
    }

    parts.join("\n")
}

fn build_rules() -> Vec<ClassificationRule> {
    use FailureCategory::{
        Code, Configuration, Dependency, Flaky, Infrastructure, Security, Test,
    };
    vec![
        // Infrastructure
        ClassificationRule::new(
            "memory_exhaustion",
            Infrastructure,
            &[
                r"out\s*of\s*memory",
                r"oom\s*kill",
                r"memory\s*allocation\s*failed",
                r"java\.lang\.OutOfMemoryError",
                r"cannot\s*allocate\s*memory",
            ],
            0.95,
            "Memory exhaustion detected",
        ),
        ClassificationRule::new(
            "disk_exhaustion",
            Infrastructure,
            &[
                r"no\s*space\s*left",
                r"disk\s*full",
                r"ENOSPC",
                r"insufficient\s*disk\s*space",
            ],
            0.95,
            "Disk space exhaustion detected",
        ),
        ClassificationRule::new(
            "network_failure",
            Infrastructure,
            &[
                r"connection\s*refused",
                r"connection\s*timed?\s*out",
                r"ECONNREFUSED",
                r"ETIMEDOUT",
                r"network\s*unreachable",
                r"could\s*not\s*resolve\s*host",
            ],
            0.85,
            "Network connectivity issue detected",
        ),
        ClassificationRule::new(
            "ci_runner_issue",
            Infrastructure,
            &[
                r"runner\s*failed",
                r"runner\s*system\s*failure",
                r"job\s*was\s*terminated",
            ],
            0.90,
            "CI runner infrastructure issue",
        ),
        // Dependency
        ClassificationRule::new(
            "python_import_error",
            Dependency,
            &[
                r"ModuleNotFoundError",
                r"ImportError",
                r"No\s*module\s*named",
                r"cannot\s*import\s*name",
            ],
            0.90,
            "Python import/dependency error",
        ),
        ClassificationRule::new(
            "npm_dependency",
            Dependency,
            &[
                r"npm\s*ERR!.*peer\s*dep",
                r"npm\s*ERR!.*ERESOLVE",
                r"Cannot\s*find\s*module",
                r"Module\s*not\s*found",
                r"Could\s*not\s*resolve\s*dependency",
            ],
            0.90,
            "NPM dependency resolution error",
        ),
        ClassificationRule::new(
            "go_module_missing",
            Dependency,
            &[
                r"no\s*required\s*module\s*provides\s*package",
                r"missing\s*go\.sum\s*entry",
            ],
            0.90,
            "Go module resolution error",
        ),
        ClassificationRule::new(
            "version_conflict",
            Dependency,
            &[
                r"version\s*conflict",
                r"incompatible\s*version",
                r"version\s*mismatch",
            ],
            0.85,
            "Version conflict detected",
        ),
        // Configuration
        ClassificationRule::new(
            "missing_env_var",
            Configuration,
            &[
                r"environment\s*variable.*not\s*set",
                r"missing\s*env",
                r#"KeyError:.*['"]?[A-Z_]+['"]?"#,
                r"required.*not\s*provided",
            ],
            0.90,
            "Missing environment variable or configuration",
        ),
        ClassificationRule::new(
            "config_parse_error",
            Configuration,
            &[
                r"YAML\s*parse\s*error",
                r"JSON\s*parse\s*error",
                r"invalid\s*configuration",
                r"config.*validation.*failed",
            ],
            0.85,
            "Configuration parsing error",
        ),
        ClassificationRule::new(
            "permission_denied",
            Configuration,
            &[
                r"permission\s*denied",
                r"access\s*denied",
                r"EACCES",
                r"403\s*Forbidden",
                r"401\s*Unauthorized",
            ],
            0.85,
            "Permission or access configuration issue",
        ),
        // Code
        ClassificationRule::new(
            "syntax_error",
            Code,
            &[
                r"SyntaxError",
                r"unexpected\s*token",
                r"compilation\s*failed",
            ],
            0.90,
            "Syntax or compilation error",
        ),
        ClassificationRule::new(
            "type_error",
            Code,
            &[
                r"TypeError",
                r"AttributeError",
                r"undefined\s*is\s*not\s*a\s*function",
                r"Cannot\s*read\s*propert",
                r"NullPointerException",
                r"nil\s*pointer\s*dereference",
            ],
            0.85,
            "Type or null reference error",
        ),
        ClassificationRule::new(
            "logic_error",
            Code,
            &[
                r"IndexError",
                r"index\s*out\s*of\s*(?:range|bounds)",
                r"ArrayIndexOutOfBoundsException",
            ],
            0.80,
            "Logic or indexing error",
        ),
        // Test
        ClassificationRule::new(
            "assertion_failure",
            Test,
            &[
                r"AssertionError",
                r"assert\s*.*failed",
                r"expected.*but\s*got",
                r"FAILED\s+test",
            ],
            0.85,
            "Test assertion failure",
        ),
        // Flaky
        ClassificationRule::new(
            "timeout",
            Flaky,
            &[
                r"timed?\s*out",
                r"deadline\s*exceeded",
                r"operation\s*timed?\s*out",
            ],
            0.70,
            "Timeout - possibly flaky",
        ),
        ClassificationRule::new(
            "race_condition",
            Flaky,
            &[
                r"race\s*condition",
                r"concurrent\s*modification",
                r"deadlock",
            ],
            0.75,
            "Possible race condition or concurrency issue",
        ),
        // Security
        ClassificationRule::new(
            "security_scan",
            Security,
            &[
                r"vulnerability\s*found",
                r"CVE-\d{4}-\d+",
                r"security\s*scan\s*failed",
                r"high\s*severity\s*issue",
            ],
            0.95,
            "Security scan failure",
        ),
    ]
}
