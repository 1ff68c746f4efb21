//! Fix plan generation.
//!
//! Two interchangeable implementations behind [`PlanGenerator`]:
//! - [`LlmPlanGenerator`] renders a prompt from the RCA and context, calls
//!   the language-model client, and parses a strict JSON plan
//! - [`DeterministicPlanGenerator`] synthesizes minimal plans for the known
//!   categories straight from the log text, no model involved

use async_trait::async_trait;
use handlebars::Handlebars;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

use schemas::{
    BaseImagePin, FailureContextBundle, FixOperation, FixPlan, OperationDetails, OperationType,
    RcaResult,
};

/// Errors from the language-model client.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("language model request failed: {0}")]
    Request(String),
    #[error("language model request timed out")]
    Timeout,
}

/// Narrow language-model client interface.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion for `prompt`.
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError>;

    /// Model identifier for provenance.
    fn model_name(&self) -> &str;
}

/// Errors from plan generation.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("model response contained no JSON plan")]
    NoJsonFound,
    #[error("model response failed schema validation: {0}")]
    InvalidSchema(String),
    #[error("plan violates its contract: {0}")]
    Contract(#[from] schemas::plan::PlanContractError),
    #[error("no deterministic plan for category `{0}`")]
    UnknownCategory(String),
}

impl PlanError {
    /// Whether retrying generation could help.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Llm(LlmError::Timeout | LlmError::Request(_)))
    }
}

/// Everything a generator needs beyond the RCA itself.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    /// Category hint from adapter detection
    pub category_hint: Option<String>,
    /// Operation types the selected adapter allows
    pub allowed_fix_types: BTreeSet<OperationType>,
    /// Repo file listing, when available (canonical target selection)
    pub repo_files: Vec<String>,
}

/// Produces fix plans.
#[async_trait]
pub trait PlanGenerator: Send + Sync {
    /// Generate a plan for the analyzed failure.
    async fn generate_plan(
        &self,
        rca: &RcaResult,
        context: &FailureContextBundle,
        request: &PlanRequest,
    ) -> Result<FixPlan, PlanError>;

    /// Model identifier for provenance (`deterministic` for the rule-based
    /// generator).
    fn model_name(&self) -> String;
}

const PLAN_PROMPT_TEMPLATE: &str = "\
You are a CI remediation planner. A pipeline failed and was analyzed.

Repository: {{repo}}
Failure category: {{category}}
Root cause hypothesis: {{hypothesis}}

Key evidence:
{{#each evidence}}- {{this}}
{{/each}}
Affected files:
{{#each files}}- {{this}}
{{/each}}
Allowed operation types: {{allowed_types}}

Respond with a single JSON object and nothing else, with fields:
root_cause (string), category (string), confidence (number 0..1),
files (array of strings), operations (array of objects with type, file,
details, rationale, evidence). The details object carries a `kind`
discriminator. Every operation file must appear in files, and every
operation type must be one of the allowed types.
";

/// LLM-backed plan generation.
pub struct LlmPlanGenerator<C> {
    client: C,
    registry: Handlebars<'static>,
    max_tokens: u32,
    temperature: f32,
}

impl<C: LlmClient> LlmPlanGenerator<C> {
    /// Wrap a language-model client.
    #[must_use]
    pub fn new(client: C) -> Self {
        let mut registry = Handlebars::new();
        registry
            .register_template_string("plan", PLAN_PROMPT_TEMPLATE)
            .expect("static template parses");
        Self {
            client,
            registry,
            max_tokens: 1024,
            temperature: 0.1,
        }
    }

    fn render_prompt(
        &self,
        rca: &RcaResult,
        context: &FailureContextBundle,
        request: &PlanRequest,
    ) -> String {
        let allowed: Vec<&str> = request.allowed_fix_types.iter().map(|t| t.name()).collect();
        let data = serde_json::json!({
            "repo": context.repo,
            "category": request
                .category_hint
                .clone()
                .unwrap_or_else(|| rca.classification.category.name().to_string()),
            "hypothesis": rca.primary_hypothesis.description,
            "evidence": rca.primary_hypothesis.evidence,
            "files": rca.affected_files.iter().map(|f| f.filename.clone()).collect::<Vec<_>>(),
            "allowed_types": allowed.join(", "),
        });
        self.registry
            .render("plan", &data)
            .unwrap_or_else(|_| PLAN_PROMPT_TEMPLATE.to_string())
    }
}

/// Extract the first balanced JSON object from model output.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

#[async_trait]
impl<C: LlmClient> PlanGenerator for LlmPlanGenerator<C> {
    async fn generate_plan(
        &self,
        rca: &RcaResult,
        context: &FailureContextBundle,
        request: &PlanRequest,
    ) -> Result<FixPlan, PlanError> {
        let prompt = self.render_prompt(rca, context, request);
        let response = self
            .client
            .generate(&prompt, self.max_tokens, self.temperature)
            .await?;
        debug!(bytes = response.len(), "Received plan response");

        let json = extract_json_object(&response).ok_or(PlanError::NoJsonFound)?;
        let plan: FixPlan =
            serde_json::from_str(json).map_err(|e| PlanError::InvalidSchema(e.to_string()))?;
        plan.check_contract()?;
        Ok(plan)
    }

    fn model_name(&self) -> String {
        self.client.model_name().to_string()
    }
}

static MISSING_PY_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"No module named ['"]([^'"]+)['"]"#).unwrap());
static UNUSED_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^([^\s:]+):\d+:\d+:?\s*F401:?\s*'([^']+)' imported but unused").unwrap()
});
static MISSING_NODE_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"Cannot find module ['"]([^'"]+)['"]"#).unwrap());
static MISSING_GO_PACKAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"no required module provides package\s+([^\s;]+)").unwrap());
static MAVEN_DEP_MISSING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"dependencies\.dependency\.version.*?for\s+([A-Za-z0-9_.-]+):([A-Za-z0-9_.-]+)\s+is missing")
        .unwrap()
});
static MAVEN_PLUGIN_MISSING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Plugin\s+([A-Za-z0-9_.-]+):([A-Za-z0-9_.-]+):([A-Za-z0-9_.-]+)\s+or one of its dependencies could not be resolved",
    )
    .unwrap()
});
static BAD_IMAGE_MANIFEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"manifest for ([^:\s]+)(?::\S+)? not found").unwrap());

/// Deterministic, log-derived plan generation for the known categories.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeterministicPlanGenerator;

impl DeterministicPlanGenerator {
    /// Create a generator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn dependency_details(name: &str, spec: &str) -> OperationDetails {
        OperationDetails::Dependency {
            name: name.to_string(),
            spec: spec.to_string(),
            group_id: None,
            artifact_id: None,
            plugin: false,
        }
    }

    fn build_plan(
        category: &str,
        log_text: &str,
        request: &PlanRequest,
    ) -> Result<FixPlan, PlanError> {
        let evidence: Vec<String> = log_text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .rev()
            .take(3)
            .map(String::from)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        let (files, mut operations): (Vec<String>, Vec<FixOperation>) = match category {
            "python_missing_dependency" => {
                let name = MISSING_PY_MODULE
                    .captures(log_text)
                    .map(|c| c[1].split('.').next().unwrap_or(&c[1]).to_string())
                    .unwrap_or_else(|| "requests".to_string());
                let target = if request.repo_files.iter().any(|f| f == "requirements.txt") {
                    "requirements.txt"
                } else {
                    "pyproject.toml"
                };
                let op_type = if request.allowed_fix_types.contains(&OperationType::AddDependency)
                    || request.allowed_fix_types.is_empty()
                {
                    OperationType::AddDependency
                } else {
                    OperationType::PinDependency
                };
                let spec = if target.ends_with(".toml") {
                    "^1.0.0"
                } else {
                    "==1.0.0"
                };
                (
                    vec![target.to_string()],
                    vec![FixOperation {
                        op_type,
                        file: target.to_string(),
                        details: Self::dependency_details(&name, spec),
                        rationale: "Add the missing dependency referenced by the failure logs"
                            .to_string(),
                        evidence: evidence.clone(),
                    }],
                )
            }
            "lint_format" => {
                let (file, name) = UNUSED_IMPORT
                    .captures(log_text)
                    .map(|c| {
                        (
                            c[1].to_string(),
                            c[2].split('.').next_back().unwrap_or(&c[2]).to_string(),
                        )
                    })
                    .unwrap_or_else(|| ("src/app.py".to_string(), "os".to_string()));
                (
                    vec![file.clone()],
                    vec![FixOperation {
                        op_type: OperationType::RemoveUnused,
                        file,
                        details: OperationDetails::RemoveImport { name, module: None },
                        rationale: "Remove unused import to satisfy linting".to_string(),
                        evidence: evidence.clone(),
                    }],
                )
            }
            "node_missing_dependency" => {
                let name = MISSING_NODE_MODULE
                    .captures(log_text)
                    .map(|c| c[1].to_string())
                    .unwrap_or_else(|| "lodash".to_string());
                (
                    vec!["package.json".to_string()],
                    vec![FixOperation {
                        op_type: OperationType::AddDependency,
                        file: "package.json".to_string(),
                        details: Self::dependency_details(&name, "^1.0.0"),
                        rationale: "Add the missing Node dependency referenced by the failure logs"
                            .to_string(),
                        evidence: evidence.clone(),
                    }],
                )
            }
            "node_lockfile_mismatch" => (
                vec!["package-lock.json".to_string()],
                vec![FixOperation {
                    op_type: OperationType::UpdateConfig,
                    file: "package-lock.json".to_string(),
                    details: OperationDetails::Lockfile {
                        lockfile_version: Some(2),
                        ensure_root_dependencies: std::collections::BTreeMap::new(),
                    },
                    rationale: "Bring package-lock.json to a supported lockfileVersion".to_string(),
                    evidence: evidence.clone(),
                }],
            ),
            "go_mod_tidy" => (
                vec!["go.sum".to_string()],
                vec![FixOperation {
                    op_type: OperationType::UpdateConfig,
                    file: "go.sum".to_string(),
                    details: OperationDetails::TouchFile {},
                    rationale: "Normalize go.sum presence for deterministic builds".to_string(),
                    evidence: evidence.clone(),
                }],
            ),
            "go_add_missing_module" => {
                let module = MISSING_GO_PACKAGE
                    .captures(log_text)
                    .map(|c| {
                        c[1].split('/')
                            .take(3)
                            .collect::<Vec<_>>()
                            .join("/")
                    })
                    .unwrap_or_else(|| "github.com/acme/foo".to_string());
                (
                    vec!["go.mod".to_string()],
                    vec![FixOperation {
                        op_type: OperationType::PinDependency,
                        file: "go.mod".to_string(),
                        details: Self::dependency_details(&module, "v1.0.0"),
                        rationale: "Add the missing Go module requirement".to_string(),
                        evidence: evidence.clone(),
                    }],
                )
            }
            "java_dependency_version_missing" => {
                let (group, artifact) = MAVEN_DEP_MISSING
                    .captures(log_text)
                    .map(|c| (c[1].to_string(), c[2].to_string()))
                    .unwrap_or_else(|| {
                        ("org.junit.jupiter".to_string(), "junit-jupiter".to_string())
                    });
                (
                    vec!["pom.xml".to_string()],
                    vec![FixOperation {
                        op_type: OperationType::PinDependency,
                        file: "pom.xml".to_string(),
                        details: OperationDetails::Dependency {
                            name: format!("{group}:{artifact}"),
                            spec: "1.0.0".to_string(),
                            group_id: Some(group),
                            artifact_id: Some(artifact),
                            plugin: false,
                        },
                        rationale: "Pin a missing Maven dependency version".to_string(),
                        evidence: evidence.clone(),
                    }],
                )
            }
            "java_plugin_version_missing" => {
                let (group, artifact) = MAVEN_PLUGIN_MISSING
                    .captures(log_text)
                    .map(|c| (c[1].to_string(), c[2].to_string()))
                    .unwrap_or_else(|| {
                        (
                            "org.apache.maven.plugins".to_string(),
                            "maven-surefire-plugin".to_string(),
                        )
                    });
                (
                    vec!["pom.xml".to_string()],
                    vec![FixOperation {
                        op_type: OperationType::PinDependency,
                        file: "pom.xml".to_string(),
                        details: OperationDetails::Dependency {
                            name: format!("{group}:{artifact}"),
                            spec: "3.1.2".to_string(),
                            group_id: Some(group),
                            artifact_id: Some(artifact),
                            plugin: true,
                        },
                        rationale: "Pin a missing Maven plugin version".to_string(),
                        evidence: evidence.clone(),
                    }],
                )
            }
            "docker_pin_base_image" => {
                let image = BAD_IMAGE_MANIFEST
                    .captures(log_text)
                    .map(|c| c[1].to_string())
                    .unwrap_or_else(|| "ubuntu".to_string());
                let tag = if image == "ubuntu" { "22.04" } else { "latest" };
                (
                    vec!["Dockerfile".to_string()],
                    vec![FixOperation {
                        op_type: OperationType::UpdateConfig,
                        file: "Dockerfile".to_string(),
                        details: OperationDetails::Dockerfile {
                            pin_base_image: Some(BaseImagePin {
                                image,
                                tag: tag.to_string(),
                            }),
                            apt_get_cleanup: false,
                        },
                        rationale: "Pin a stable base image tag instead of an unstable reference"
                            .to_string(),
                        evidence: evidence.clone(),
                    }],
                )
            }
            "docker_apt_get_cleanup" => (
                vec!["Dockerfile".to_string()],
                vec![FixOperation {
                    op_type: OperationType::UpdateConfig,
                    file: "Dockerfile".to_string(),
                    details: OperationDetails::Dockerfile {
                        pin_base_image: None,
                        apt_get_cleanup: true,
                    },
                    rationale: "Ensure apt cache cleanup to reduce transient apt failures"
                        .to_string(),
                    evidence: evidence.clone(),
                }],
            ),
            other => return Err(PlanError::UnknownCategory(other.to_string())),
        };

        if !request.allowed_fix_types.is_empty() {
            operations.retain(|op| request.allowed_fix_types.contains(&op.op_type));
        }

        Ok(FixPlan {
            root_cause: format!("deterministic plan for {category}"),
            category: category.to_string(),
            confidence: 0.5,
            files,
            operations,
        })
    }
}

#[async_trait]
impl PlanGenerator for DeterministicPlanGenerator {
    async fn generate_plan(
        &self,
        _rca: &RcaResult,
        context: &FailureContextBundle,
        request: &PlanRequest,
    ) -> Result<FixPlan, PlanError> {
        let category = request
            .category_hint
            .clone()
            .ok_or_else(|| PlanError::UnknownCategory("<none>".to_string()))?;
        let plan = Self::build_plan(&category, context.log_text(), request)?;
        plan.check_contract()?;
        Ok(plan)
    }

    fn model_name(&self) -> String {
        "deterministic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use schemas::{Classification, LogContent, RcaHypothesis};
    use uuid::Uuid;

    fn context(log: &str) -> FailureContextBundle {
        FailureContextBundle {
            event_id: Uuid::new_v4(),
            repo: "acme/widgets".into(),
            commit_sha: "abc".into(),
            branch: "main".into(),
            pipeline_id: "1".into(),
            job_name: None,
            log_content: Some(LogContent::capped(log, usize::MAX, None)),
            log_summary: None,
            errors: vec![],
            stack_traces: vec![],
            test_failures: vec![],
            build_errors: vec![],
            changed_files: vec![],
            commit_message: None,
            execution_time_seconds: None,
            step_timings: vec![],
            built_at: Utc::now(),
        }
    }

    fn rca() -> RcaResult {
        RcaResult {
            event_id: Uuid::new_v4(),
            classification: Classification::unknown(),
            primary_hypothesis: RcaHypothesis {
                description: "missing dependency".into(),
                confidence: 0.9,
                evidence: vec!["No module named 'requests'".into()],
                suggested_fix: None,
            },
            alternative_hypotheses: vec![],
            affected_files: vec![],
            similar_incidents: vec![],
            suggested_patterns: vec![],
            analysis_time_seconds: None,
        }
    }

    fn request(category: &str, types: &[OperationType]) -> PlanRequest {
        PlanRequest {
            category_hint: Some(category.to_string()),
            allowed_fix_types: types.iter().copied().collect(),
            repo_files: vec![],
        }
    }

    #[tokio::test]
    async fn test_python_missing_dependency_plan() {
        let generator = DeterministicPlanGenerator::new();
        let plan = generator
            .generate_plan(
                &rca(),
                &context("ModuleNotFoundError: No module named 'requests'"),
                &request(
                    "python_missing_dependency",
                    &[OperationType::AddDependency, OperationType::PinDependency],
                ),
            )
            .await
            .unwrap();
        assert_eq!(plan.category, "python_missing_dependency");
        assert_eq!(plan.files, vec!["pyproject.toml"]);
        assert_eq!(plan.operations.len(), 1);
        let op = &plan.operations[0];
        assert_eq!(op.op_type, OperationType::AddDependency);
        match &op.details {
            OperationDetails::Dependency { name, spec, .. } => {
                assert_eq!(name, "requests");
                assert_eq!(spec, "^1.0.0");
            }
            other => panic!("unexpected details: {other:?}"),
        }
        assert!(plan.check_contract().is_ok());
    }

    #[tokio::test]
    async fn test_python_prefers_requirements_when_present() {
        let generator = DeterministicPlanGenerator::new();
        let mut req = request("python_missing_dependency", &[OperationType::AddDependency]);
        req.repo_files = vec!["requirements.txt".to_string(), "src/app.py".to_string()];
        let plan = generator
            .generate_plan(
                &rca(),
                &context("No module named 'flask'"),
                &req,
            )
            .await
            .unwrap();
        assert_eq!(plan.files, vec!["requirements.txt"]);
        match &plan.operations[0].details {
            OperationDetails::Dependency { spec, .. } => assert_eq!(spec, "==1.0.0"),
            other => panic!("unexpected details: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_go_missing_module_plan() {
        let generator = DeterministicPlanGenerator::new();
        let plan = generator
            .generate_plan(
                &rca(),
                &context("main.go:3:8: no required module provides package github.com/acme/foo/pkg/util"),
                &request("go_add_missing_module", &[OperationType::PinDependency]),
            )
            .await
            .unwrap();
        assert_eq!(plan.files, vec!["go.mod"]);
        match &plan.operations[0].details {
            OperationDetails::Dependency { name, spec, .. } => {
                // Module path collapses to the first three segments
                assert_eq!(name, "github.com/acme/foo");
                assert_eq!(spec, "v1.0.0");
            }
            other => panic!("unexpected details: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disallowed_types_filtered() {
        let generator = DeterministicPlanGenerator::new();
        let plan = generator
            .generate_plan(
                &rca(),
                &context("No module named 'requests'"),
                &request("python_missing_dependency", &[OperationType::UpdateConfig]),
            )
            .await
            .unwrap();
        // The only candidate operation is not allowed, so the plan carries
        // none; the orchestrator rejects it downstream.
        assert!(plan.operations.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_category_errors() {
        let generator = DeterministicPlanGenerator::new();
        let err = generator
            .generate_plan(
                &rca(),
                &context("something"),
                &request("rust_borrowck", &[]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PlanError::UnknownCategory(_)));
    }

    struct CannedLlm(String);

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn generate(&self, _: &str, _: u32, _: f32) -> Result<String, LlmError> {
            Ok(self.0.clone())
        }
        fn model_name(&self) -> &str {
            "canned"
        }
    }

    #[tokio::test]
    async fn test_llm_generator_parses_strict_json() {
        let response = r#"Here is the plan:
{"root_cause": "requests missing", "category": "python_missing_dependency",
 "confidence": 0.8, "files": ["pyproject.toml"],
 "operations": [{"type": "add_dependency", "file": "pyproject.toml",
   "details": {"kind": "dependency", "name": "requests", "spec": "^1.0.0"},
   "rationale": "missing module", "evidence": []}]}
Done."#;
        let generator = LlmPlanGenerator::new(CannedLlm(response.to_string()));
        let plan = generator
            .generate_plan(
                &rca(),
                &context("log"),
                &request("python_missing_dependency", &[OperationType::AddDependency]),
            )
            .await
            .unwrap();
        assert_eq!(plan.category, "python_missing_dependency");
        assert_eq!(generator.model_name(), "canned");
    }

    #[tokio::test]
    async fn test_llm_generator_rejects_contract_violation() {
        let response = r#"{"root_cause": "x", "category": "c", "confidence": 0.8,
 "files": ["a.txt"],
 "operations": [{"type": "add_dependency", "file": "other.txt",
   "details": {"kind": "dependency", "name": "n", "spec": "1"},
   "rationale": "r", "evidence": []}]}"#;
        let generator = LlmPlanGenerator::new(CannedLlm(response.to_string()));
        let err = generator
            .generate_plan(&rca(), &context("log"), &request("c", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, PlanError::Contract(_)));
    }

    #[tokio::test]
    async fn test_llm_generator_rejects_no_json() {
        let generator = LlmPlanGenerator::new(CannedLlm("I cannot help with that.".to_string()));
        let err = generator
            .generate_plan(&rca(), &context("log"), &request("c", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, PlanError::NoJsonFound));
    }

    #[test]
    fn test_extract_json_handles_nesting_and_strings() {
        let text = r#"prefix {"a": {"b": "with } brace"}, "c": 1} suffix"#;
        let json = extract_json_object(text).unwrap();
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(value["c"], 1);
    }
}
