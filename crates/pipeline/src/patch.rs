//! Deterministic patch generation.
//!
//! Applies a plan's typed operations to the checked-out tree in memory and
//! emits one normalized unified diff. Content is normalized (trailing
//! whitespace stripped, trailing newline enforced) before diffing, so
//! repeated runs produce byte-identical patches and whitespace-only edits
//! vanish.

use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

use safety::normalize_path;
use schemas::{BaseImagePin, FixOperation, FixPlan, OperationDetails, OperationType};

/// Errors from patch generation.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("plan has no target files")]
    EmptyPlan,
    #[error("operation targets `{0}`, which is not in plan.files")]
    OperationOutsideFiles(String),
    #[error("{file}: {reason}")]
    UnsupportedTarget { file: String, reason: String },
    #[error("pyproject.toml missing [tool.poetry.dependencies]")]
    MissingDependencySection,
    #[error("go.mod has no usable require block or line for `{0}`")]
    MissingRequire(String),
    #[error("pom.xml {kind} {coordinates} not found")]
    MissingPomCoordinates { kind: String, coordinates: String },
    #[error("Dockerfile has no FROM instruction to pin")]
    MissingFromInstruction,
    #[error("{file} is not valid JSON: {reason}")]
    InvalidJson { file: String, reason: String },
    #[error("operation details do not match operation type `{0}`")]
    DetailsMismatch(&'static str),
    #[error("failed to read {file}: {source}")]
    Read {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

/// Measured output of one generation run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PatchStats {
    /// Files with a non-empty diff
    pub files_changed: Vec<String>,
    /// Count of changed files
    pub total_files: u64,
    /// Lines added
    pub total_lines_added: u64,
    /// Lines removed
    pub total_lines_removed: u64,
    /// Diff size in bytes
    pub diff_bytes: u64,
}

/// The generated diff plus its stats.
#[derive(Debug, Clone)]
pub struct PatchOutput {
    /// Combined unified diff, one file section per changed file
    pub diff_text: String,
    /// Measurements over the combined diff
    pub stats: PatchStats,
}

/// Applies fix plans to a repository checkout.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatchGenerator;

impl PatchGenerator {
    /// Create a generator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Generate the unified diff for `plan` against `repo_path`.
    ///
    /// Files are read from disk (empty pre-image when missing), every
    /// operation targeting a file is applied in plan order, and files whose
    /// content did not change are omitted from the diff.
    pub fn generate(&self, repo_path: &Path, plan: &FixPlan) -> Result<PatchOutput, PatchError> {
        let mut plan_files: Vec<String> = plan
            .files
            .iter()
            .filter(|f| !f.is_empty())
            .map(|f| normalize_path(f))
            .collect();
        plan_files.sort();
        plan_files.dedup();
        if plan_files.is_empty() {
            return Err(PatchError::EmptyPlan);
        }

        let mut original: BTreeMap<String, String> = BTreeMap::new();
        let mut updated: BTreeMap<String, String> = BTreeMap::new();
        for file in &plan_files {
            let abs = repo_path.join(file);
            let content = if abs.exists() {
                std::fs::read_to_string(&abs).map_err(|source| PatchError::Read {
                    file: file.clone(),
                    source,
                })?
            } else {
                String::new()
            };
            original.insert(file.clone(), content.clone());
            updated.insert(file.clone(), content);
        }

        for op in &plan.operations {
            let op_file = normalize_path(&op.file);
            let Some(content) = updated.get(&op_file) else {
                return Err(PatchError::OperationOutsideFiles(op_file));
            };
            let next = apply_operation(content, op)?;
            updated.insert(op_file, next);
        }

        let mut diffs: Vec<String> = Vec::new();
        let mut files_changed: Vec<String> = Vec::new();
        let mut total_added = 0;
        let mut total_removed = 0;

        for file in &plan_files {
            let before = normalize_whitespace(&original[file]);
            let after = normalize_whitespace(&updated[file]);
            if before == after {
                continue;
            }
            let diff_text = unified_diff(file, &before, &after);
            if diff_text.trim().is_empty() {
                continue;
            }
            let (added, removed) = count_diff_changes(&diff_text);
            total_added += added;
            total_removed += removed;
            files_changed.push(file.clone());
            diffs.push(diff_text);
        }

        let combined = if diffs.is_empty() {
            String::new()
        } else {
            let mut text = diffs.join("");
            if !text.ends_with('\n') {
                text.push('\n');
            }
            text
        };

        let stats = PatchStats {
            total_files: files_changed.len() as u64,
            files_changed,
            total_lines_added: total_added,
            total_lines_removed: total_removed,
            diff_bytes: combined.len() as u64,
        };
        Ok(PatchOutput {
            diff_text: combined,
            stats,
        })
    }
}

fn apply_operation(content: &str, op: &FixOperation) -> Result<String, PatchError> {
    match op.op_type {
        OperationType::AddDependency | OperationType::PinDependency => {
            apply_dependency(content, op)
        }
        OperationType::UpdateConfig => apply_update_config(content, op),
        OperationType::RemoveUnused => match &op.details {
            OperationDetails::RemoveImport { name, module } => {
                Ok(remove_unused_import(content, name, module.as_deref()))
            }
            _ => Err(PatchError::DetailsMismatch("remove_unused")),
        },
    }
}

fn apply_dependency(content: &str, op: &FixOperation) -> Result<String, PatchError> {
    let OperationDetails::Dependency {
        name,
        spec,
        group_id,
        artifact_id,
        plugin,
    } = &op.details
    else {
        return Err(PatchError::DetailsMismatch("add_dependency/pin_dependency"));
    };

    let file = normalize_path(&op.file);
    if file.ends_with("pyproject.toml") {
        return toml_upsert_dependency(content, name, spec);
    }
    if file.ends_with("requirements.txt") {
        return Ok(requirements_upsert_dependency(content, name, spec));
    }
    if file.ends_with("package.json") {
        return package_json_upsert_dependency(content, name, spec, &file);
    }
    if file.ends_with("go.mod") {
        return Ok(go_mod_upsert_require(content, name, spec));
    }
    if file.ends_with("pom.xml") {
        let (group, artifact) = match (group_id, artifact_id) {
            (Some(g), Some(a)) => (g.clone(), a.clone()),
            _ => match name.split_once(':') {
                Some((g, a)) => (g.to_string(), a.to_string()),
                None => {
                    return Err(PatchError::UnsupportedTarget {
                        file,
                        reason: "pom.xml pin requires group_id and artifact_id".to_string(),
                    })
                }
            },
        };
        return pom_xml_pin_version(content, &group, &artifact, spec, *plugin);
    }
    Err(PatchError::UnsupportedTarget {
        file,
        reason:
            "dependency operations support pyproject.toml, requirements.txt, package.json, go.mod, pom.xml"
                .to_string(),
    })
}

fn apply_update_config(content: &str, op: &FixOperation) -> Result<String, PatchError> {
    let file = normalize_path(&op.file);
    match &op.details {
        OperationDetails::Lockfile {
            lockfile_version,
            ensure_root_dependencies,
        } if file.ends_with("package-lock.json") => package_lock_update(
            content,
            *lockfile_version,
            ensure_root_dependencies,
            &file,
        ),
        OperationDetails::Dockerfile {
            pin_base_image,
            apt_get_cleanup,
        } if file.ends_with("Dockerfile") => {
            dockerfile_update(content, pin_base_image.as_ref(), *apt_get_cleanup)
        }
        OperationDetails::TouchFile {} if file.ends_with("go.sum") => {
            Ok(ensure_trailing_newline(content))
        }
        _ => Err(PatchError::UnsupportedTarget {
            file,
            reason: "update_config supports package-lock.json, Dockerfile, go.sum".to_string(),
        }),
    }
}

/// Strip trailing whitespace per line and enforce a trailing newline.
fn normalize_whitespace(content: &str) -> String {
    let mut out: String = content
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    out.push('\n');
    out
}

fn ensure_trailing_newline(content: &str) -> String {
    if content.ends_with('\n') {
        content.to_string()
    } else {
        format!("{content}\n")
    }
}

/// Render a unified diff with `a/`/`b/` headers for one file.
fn unified_diff(file_path: &str, before: &str, after: &str) -> String {
    let patch = diffy::create_patch(before, after);
    let rendered = patch.to_string();
    let mut out = String::with_capacity(rendered.len() + file_path.len() * 2);
    for (i, line) in rendered.lines().enumerate() {
        match i {
            0 if line.starts_with("--- ") => out.push_str(&format!("--- a/{file_path}")),
            1 if line.starts_with("+++ ") => out.push_str(&format!("+++ b/{file_path}")),
            _ => out.push_str(line),
        }
        out.push('\n');
    }
    out
}

fn count_diff_changes(diff_text: &str) -> (u64, u64) {
    let mut added = 0;
    let mut removed = 0;
    for line in diff_text.lines() {
        if line.starts_with('+') && !line.starts_with("+++") {
            added += 1;
        } else if line.starts_with('-') && !line.starts_with("---") {
            removed += 1;
        }
    }
    (added, removed)
}

fn toml_section_bounds(lines: &[&str], section: &str) -> Option<(usize, usize)> {
    let header = format!("[{section}]");
    let start = lines.iter().position(|l| l.trim() == header)?;
    let end = lines
        .iter()
        .enumerate()
        .skip(start + 1)
        .find(|(_, l)| l.starts_with('[') && l.trim().ends_with(']'))
        .map_or(lines.len(), |(i, _)| i);
    Some((start, end))
}

static TOML_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z0-9_.-]+)\s*=\s*(.+)$").unwrap());

/// Upsert into `[tool.poetry.dependencies]`, keeping keys in lexical order
/// with `python` exempt from the ordering.
fn toml_upsert_dependency(content: &str, name: &str, spec: &str) -> Result<String, PatchError> {
    let mut lines: Vec<String> = content.lines().map(String::from).collect();
    let line_refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let (start, end) = toml_section_bounds(&line_refs, "tool.poetry.dependencies")
        .ok_or(PatchError::MissingDependencySection)?;

    let mut existing: Vec<(String, usize)> = Vec::new();
    for (idx, line) in line_refs.iter().enumerate().take(end).skip(start + 1) {
        if let Some(caps) = TOML_KEY.captures(line) {
            existing.push((caps[1].to_string(), idx));
        }
    }

    for (key, idx) in &existing {
        if key.eq_ignore_ascii_case(name) {
            lines[*idx] = format!("{name} = \"{spec}\"");
            return Ok(lines.join("\n") + "\n");
        }
    }

    let mut insertion_idx = end;
    for (key, idx) in &existing {
        if !key.eq_ignore_ascii_case("python") && name.to_lowercase() < key.to_lowercase() {
            insertion_idx = *idx;
            break;
        }
    }

    lines.insert(insertion_idx, format!("{name} = \"{spec}\""));
    Ok(lines.join("\n") + "\n")
}

/// Replace the whole line when the name matches case-insensitively, else
/// append.
fn requirements_upsert_dependency(content: &str, name: &str, spec: &str) -> String {
    let normalized = name.to_lowercase();
    let mut updated = false;
    let mut out: Vec<String> = Vec::new();

    for line in content.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            out.push(line.to_string());
            continue;
        }
        let lowered = stripped.to_lowercase();
        if lowered == normalized
            || lowered.starts_with(&format!("{normalized}=="))
            || lowered.starts_with(&format!("{normalized}>="))
        {
            out.push(format!("{name}{spec}"));
            updated = true;
        } else {
            out.push(line.to_string());
        }
    }

    if !updated {
        out.push(format!("{name}{spec}"));
    }
    out.join("\n") + "\n"
}

fn package_json_upsert_dependency(
    content: &str,
    name: &str,
    spec: &str,
    file: &str,
) -> Result<String, PatchError> {
    let source = if content.trim().is_empty() {
        "{}"
    } else {
        content
    };
    let mut data: serde_json::Value =
        serde_json::from_str(source).map_err(|e| PatchError::InvalidJson {
            file: file.to_string(),
            reason: e.to_string(),
        })?;
    let Some(object) = data.as_object_mut() else {
        return Err(PatchError::InvalidJson {
            file: file.to_string(),
            reason: "top level is not an object".to_string(),
        });
    };
    let deps = object
        .entry("dependencies")
        .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
    if !deps.is_object() {
        *deps = serde_json::Value::Object(serde_json::Map::new());
    }
    deps.as_object_mut()
        .expect("dependencies coerced to object")
        .insert(name.to_string(), serde_json::Value::String(spec.to_string()));
    Ok(serde_json::to_string_pretty(&data).expect("serializable value") + "\n")
}

/// Upsert a module into the `require (` block, or a single-line require,
/// or append one.
fn go_mod_upsert_require(content: &str, module: &str, version: &str) -> String {
    let mut lines: Vec<String> = content.lines().map(String::from).collect();

    let line_matches = |line: &str| -> bool {
        let parts: Vec<&str> = line.split_whitespace().collect();
        parts.len() >= 2 && parts[0] == module
    };

    let block_start = lines.iter().position(|l| l.trim() == "require (");
    if let Some(start) = block_start {
        if let Some(end) = lines
            .iter()
            .enumerate()
            .skip(start + 1)
            .find(|(_, l)| l.trim() == ")")
            .map(|(i, _)| i)
        {
            for idx in start + 1..end {
                if line_matches(&lines[idx]) {
                    lines[idx] = format!("\t{module} {version}");
                    return lines.join("\n") + "\n";
                }
            }
            lines.insert(end, format!("\t{module} {version}"));
            return lines.join("\n") + "\n";
        }
    }

    let single_line = lines.iter().position(|l| {
        l.strip_prefix("require ").is_some_and(&line_matches)
    });
    if let Some(idx) = single_line {
        lines[idx] = format!("require {module} {version}");
        return lines.join("\n") + "\n";
    }

    lines.push(format!("require {module} {version}"));
    lines.join("\n") + "\n"
}

static POM_DEPENDENCY_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<dependency>.*?</dependency>").unwrap());
static POM_PLUGIN_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<plugin>.*?</plugin>").unwrap());
static POM_GROUP_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<groupId>\s*([^<]+?)\s*</groupId>").unwrap());
static POM_ARTIFACT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<artifactId>\s*([^<]+?)\s*</artifactId>").unwrap());
static POM_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<version>\s*[^<]+\s*</version>").unwrap());
static POM_ARTIFACT_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</artifactId>").unwrap());

/// Insert `<version>` right after `</artifactId>` for the matching
/// dependency/plugin; an existing `<version>` is left alone.
fn pom_xml_pin_version(
    content: &str,
    group_id: &str,
    artifact_id: &str,
    version: &str,
    plugin: bool,
) -> Result<String, PatchError> {
    let block_pattern: &Regex = if plugin {
        &POM_PLUGIN_BLOCK
    } else {
        &POM_DEPENDENCY_BLOCK
    };
    let default_group = if plugin {
        Some("org.apache.maven.plugins")
    } else {
        None
    };

    let mut out = String::new();
    let mut cursor = 0;
    let mut updated = false;

    for m in block_pattern.find_iter(content) {
        out.push_str(&content[cursor..m.start()]);
        cursor = m.end();
        let block = m.as_str();

        let gid = POM_GROUP_ID
            .captures(block)
            .map(|c| c[1].trim().to_string())
            .or_else(|| default_group.map(String::from));
        let aid = POM_ARTIFACT_ID.captures(block).map(|c| c[1].trim().to_string());

        let matches = gid.as_deref() == Some(group_id) && aid.as_deref() == Some(artifact_id);
        if !matches {
            out.push_str(block);
            continue;
        }
        if POM_VERSION.is_match(block) {
            out.push_str(block);
            updated = true;
            continue;
        }
        if let Some(close) = POM_ARTIFACT_CLOSE.find(block) {
            let insert_at = close.end();
            out.push_str(&block[..insert_at]);
            out.push_str(&format!("\n      <version>{version}</version>"));
            out.push_str(&block[insert_at..]);
            updated = true;
        } else {
            out.push_str(block);
        }
    }
    out.push_str(&content[cursor..]);

    if !updated {
        return Err(PatchError::MissingPomCoordinates {
            kind: if plugin { "plugin" } else { "dependency" }.to_string(),
            coordinates: format!("{group_id}:{artifact_id}"),
        });
    }
    Ok(out)
}

fn package_lock_update(
    content: &str,
    lockfile_version: Option<u64>,
    ensure_root_dependencies: &BTreeMap<String, String>,
    file: &str,
) -> Result<String, PatchError> {
    let source = if content.trim().is_empty() {
        "{}"
    } else {
        content
    };
    let mut data: serde_json::Value =
        serde_json::from_str(source).map_err(|e| PatchError::InvalidJson {
            file: file.to_string(),
            reason: e.to_string(),
        })?;
    let Some(object) = data.as_object_mut() else {
        return Err(PatchError::InvalidJson {
            file: file.to_string(),
            reason: "top level is not an object".to_string(),
        });
    };

    if let Some(version) = lockfile_version {
        object.insert(
            "lockfileVersion".to_string(),
            serde_json::Value::Number(version.into()),
        );
    }

    if !ensure_root_dependencies.is_empty() {
        let packages = object
            .entry("packages")
            .or_insert_with(|| serde_json::json!({}));
        if !packages.is_object() {
            *packages = serde_json::json!({});
        }
        let packages = packages.as_object_mut().expect("packages is object");
        let root = packages.entry(String::new()).or_insert_with(|| serde_json::json!({}));
        if !root.is_object() {
            *root = serde_json::json!({});
        }
        let root_deps = root
            .as_object_mut()
            .expect("root is object")
            .entry("dependencies")
            .or_insert_with(|| serde_json::json!({}));
        if !root_deps.is_object() {
            *root_deps = serde_json::json!({});
        }
        for (name, version) in ensure_root_dependencies {
            root_deps
                .as_object_mut()
                .expect("dependencies is object")
                .insert(name.clone(), serde_json::Value::String(version.clone()));
        }

        let deps = object
            .entry("dependencies")
            .or_insert_with(|| serde_json::json!({}));
        if !deps.is_object() {
            *deps = serde_json::json!({});
        }
        let deps = deps.as_object_mut().expect("dependencies is object");
        for (name, version) in ensure_root_dependencies {
            let node = deps.entry(name.clone()).or_insert_with(|| serde_json::json!({}));
            if !node.is_object() {
                *node = serde_json::json!({});
            }
            node.as_object_mut()
                .expect("node is object")
                .insert("version".to_string(), serde_json::Value::String(version.clone()));
        }
    }

    Ok(serde_json::to_string_pretty(&data).expect("serializable value") + "\n")
}

static DOCKER_FROM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^(FROM\s+)(\S+)").unwrap());

fn dockerfile_update(
    content: &str,
    pin: Option<&BaseImagePin>,
    apt_get_cleanup: bool,
) -> Result<String, PatchError> {
    let mut out: Vec<String> = Vec::new();
    let mut pin_done = false;

    for line in content.lines() {
        if let Some(pin) = pin {
            if !pin_done && line.trim().to_lowercase().starts_with("from ") {
                if let Some(caps) = DOCKER_FROM.captures(line) {
                    let reference = &caps[2];
                    let image = reference.split(':').next().unwrap_or(reference);
                    if image == pin.image {
                        out.push(format!("{}{}:{}", &caps[1], pin.image, pin.tag));
                        pin_done = true;
                        continue;
                    }
                }
            }
        }
        out.push(line.to_string());
    }

    if pin.is_some() && !pin_done {
        if !content.to_lowercase().contains("from ") {
            return Err(PatchError::MissingFromInstruction);
        }
        // FROM exists but names a different image; leave it untouched
    }

    let mut result: Vec<String> = Vec::new();
    for line in out {
        if apt_get_cleanup
            && line.trim_start().starts_with("RUN ")
            && line.contains("apt-get")
            && !line.contains("rm -rf /var/lib/apt/lists")
        {
            result.push(format!("{} && rm -rf /var/lib/apt/lists/*", line.trim_end()));
        } else {
            result.push(line);
        }
    }

    Ok(result.join("\n") + if content.ends_with('\n') { "\n" } else { "" })
}

/// Remove `name` from `import`/`from ... import` lines; the whole line goes
/// when it imported nothing else.
fn remove_unused_import(content: &str, name: &str, module: Option<&str>) -> String {
    let mut out: Vec<String> = Vec::new();

    for line in content.lines() {
        let stripped = line.trim_start();

        if let Some(rest) = stripped.strip_prefix("import ") {
            let indent = &line[..line.len() - stripped.len()];
            let (kept, removed) = filter_imports(rest, name);
            if removed {
                if kept.is_empty() {
                    continue;
                }
                out.push(format!("{indent}import {}", kept.join(", ")));
                continue;
            }
        }

        if stripped.starts_with("from ") {
            if let Some((from_part, import_part)) = stripped.split_once(" import ") {
                let from_module = from_part.trim_start_matches("from ").trim();
                if module.is_none() || module == Some(from_module) {
                    let indent = &line[..line.len() - stripped.len()];
                    let (kept, removed) = filter_imports(import_part, name);
                    if removed {
                        if kept.is_empty() {
                            continue;
                        }
                        out.push(format!(
                            "{indent}from {from_module} import {}",
                            kept.join(", ")
                        ));
                        continue;
                    }
                }
            }
        }

        out.push(line.to_string());
    }

    out.join("\n") + "\n"
}

fn filter_imports(rest: &str, name: &str) -> (Vec<String>, bool) {
    let mut kept = Vec::new();
    let mut removed = false;
    for part in rest.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let base = part.split(" as ").next().unwrap_or(part).trim();
        if base == name {
            removed = true;
        } else {
            kept.push(part.to_string());
        }
    }
    (kept, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemas::OperationDetails;

    fn plan_with(files: &[&str], operations: Vec<FixOperation>) -> FixPlan {
        FixPlan {
            root_cause: "test".into(),
            category: "test".into(),
            confidence: 0.8,
            files: files.iter().map(|f| (*f).to_string()).collect(),
            operations,
        }
    }

    fn dep_op(file: &str, name: &str, spec: &str) -> FixOperation {
        FixOperation {
            op_type: OperationType::AddDependency,
            file: file.to_string(),
            details: OperationDetails::Dependency {
                name: name.to_string(),
                spec: spec.to_string(),
                group_id: None,
                artifact_id: None,
                plugin: false,
            },
            rationale: "missing dependency".into(),
            evidence: vec![],
        }
    }

    #[test]
    fn test_pyproject_lexical_insertion() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pyproject.toml"),
            "[tool.poetry.dependencies]\npython = \"^3.11\"\nflask = \"^2.0\"\nuvicorn = \"^0.30\"\n\n[tool.poetry.dev-dependencies]\npytest = \"^8.0\"\n",
        )
        .unwrap();

        let plan = plan_with(
            &["pyproject.toml"],
            vec![dep_op("pyproject.toml", "requests", "^1.0.0")],
        );
        let output = PatchGenerator::new().generate(dir.path(), &plan).unwrap();

        assert_eq!(output.stats.files_changed, vec!["pyproject.toml"]);
        assert!(output.diff_text.contains("+requests = \"^1.0.0\""));
        // Lexical order: after flask, before uvicorn; python stays first
        let applied = toml_upsert_dependency(
            &std::fs::read_to_string(dir.path().join("pyproject.toml")).unwrap(),
            "requests",
            "^1.0.0",
        )
        .unwrap();
        let flask_pos = applied.find("flask").unwrap();
        let requests_pos = applied.find("requests").unwrap();
        let uvicorn_pos = applied.find("uvicorn").unwrap();
        assert!(flask_pos < requests_pos && requests_pos < uvicorn_pos);
    }

    #[test]
    fn test_pyproject_existing_key_replaced() {
        let content = "[tool.poetry.dependencies]\npython = \"^3.11\"\nrequests = \"^0.9\"\n";
        let applied = toml_upsert_dependency(content, "requests", "^1.0.0").unwrap();
        assert!(applied.contains("requests = \"^1.0.0\""));
        assert!(!applied.contains("^0.9"));
    }

    #[test]
    fn test_pyproject_missing_section_errors() {
        let err = toml_upsert_dependency("[tool.poetry]\nname = \"x\"\n", "requests", "^1.0.0");
        assert!(matches!(err, Err(PatchError::MissingDependencySection)));
    }

    #[test]
    fn test_requirements_replace_and_append() {
        let content = "Flask==2.0\n# comment\nnumpy>=1.20\n";
        let replaced = requirements_upsert_dependency(content, "flask", "==2.1");
        assert!(replaced.contains("flask==2.1"));
        assert!(!replaced.contains("Flask==2.0"));

        let appended = requirements_upsert_dependency(content, "requests", "==1.0.0");
        assert!(appended.ends_with("requests==1.0.0\n"));
        assert!(appended.contains("# comment"));
    }

    #[test]
    fn test_package_json_upsert_sorted() {
        let content = "{\n  \"name\": \"app\",\n  \"dependencies\": {\n    \"express\": \"^4.0.0\"\n  }\n}\n";
        let applied = package_json_upsert_dependency(content, "lodash", "^1.0.0", "package.json").unwrap();
        let value: serde_json::Value = serde_json::from_str(&applied).unwrap();
        assert_eq!(value["dependencies"]["lodash"], "^1.0.0");
        assert_eq!(value["dependencies"]["express"], "^4.0.0");
    }

    #[test]
    fn test_go_mod_inserts_inside_block() {
        let content = "module acme/widgets\n\ngo 1.22\n\nrequire (\n\tgithub.com/stretchr/testify v1.9.0\n)\n";
        let applied = go_mod_upsert_require(content, "github.com/acme/foo", "v1.0.0");
        let block_start = applied.find("require (").unwrap();
        let block_end = applied.find(')').unwrap();
        let inserted = applied.find("github.com/acme/foo v1.0.0").unwrap();
        assert!(block_start < inserted && inserted < block_end);
    }

    #[test]
    fn test_go_mod_replaces_existing() {
        let content = "require (\n\tgithub.com/acme/foo v0.1.0\n)\n";
        let applied = go_mod_upsert_require(content, "github.com/acme/foo", "v1.0.0");
        assert!(applied.contains("github.com/acme/foo v1.0.0"));
        assert!(!applied.contains("v0.1.0"));
    }

    #[test]
    fn test_go_mod_regeneration_is_byte_stable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("go.mod"),
            "module acme/widgets\n\nrequire (\n\tgithub.com/stretchr/testify v1.9.0\n)\n",
        )
        .unwrap();
        let plan = plan_with(
            &["go.mod"],
            vec![FixOperation {
                op_type: OperationType::PinDependency,
                file: "go.mod".into(),
                details: OperationDetails::Dependency {
                    name: "github.com/acme/foo".into(),
                    spec: "v1.0.0".into(),
                    group_id: None,
                    artifact_id: None,
                    plugin: false,
                },
                rationale: "missing module".into(),
                evidence: vec![],
            }],
        );
        let generator = PatchGenerator::new();
        let first = generator.generate(dir.path(), &plan).unwrap();
        let second = generator.generate(dir.path(), &plan).unwrap();
        assert_eq!(first.diff_text, second.diff_text);
        assert!(!first.diff_text.is_empty());
    }

    #[test]
    fn test_pom_inserts_version_after_artifact_id() {
        let content = "<project>\n  <dependencies>\n    <dependency>\n      <groupId>org.junit.jupiter</groupId>\n      <artifactId>junit-jupiter</artifactId>\n    </dependency>\n  </dependencies>\n</project>\n";
        let applied =
            pom_xml_pin_version(content, "org.junit.jupiter", "junit-jupiter", "5.10.0", false)
                .unwrap();
        let artifact_pos = applied.find("</artifactId>").unwrap();
        let version_pos = applied.find("<version>5.10.0</version>").unwrap();
        assert!(version_pos > artifact_pos);
    }

    #[test]
    fn test_pom_existing_version_untouched() {
        let content = "<dependency>\n  <groupId>g</groupId>\n  <artifactId>a</artifactId>\n  <version>0.1</version>\n</dependency>\n";
        let applied = pom_xml_pin_version(content, "g", "a", "9.9", false).unwrap();
        assert!(applied.contains("<version>0.1</version>"));
        assert!(!applied.contains("9.9"));
    }

    #[test]
    fn test_pom_plugin_default_group() {
        let content = "<build>\n  <plugins>\n    <plugin>\n      <artifactId>maven-surefire-plugin</artifactId>\n    </plugin>\n  </plugins>\n</build>\n";
        let applied = pom_xml_pin_version(
            content,
            "org.apache.maven.plugins",
            "maven-surefire-plugin",
            "3.1.2",
            true,
        )
        .unwrap();
        assert!(applied.contains("<version>3.1.2</version>"));
    }

    #[test]
    fn test_pom_missing_coordinates_errors() {
        let content = "<dependency>\n  <groupId>g</groupId>\n  <artifactId>a</artifactId>\n</dependency>\n";
        let err = pom_xml_pin_version(content, "other", "missing", "1.0", false);
        assert!(matches!(err, Err(PatchError::MissingPomCoordinates { .. })));
    }

    #[test]
    fn test_dockerfile_pin_and_cleanup() {
        let content = "FROM ubuntu\nRUN apt-get update && apt-get install -y curl\nCOPY . /app\n";
        let applied = dockerfile_update(
            content,
            Some(&BaseImagePin {
                image: "ubuntu".into(),
                tag: "22.04".into(),
            }),
            true,
        )
        .unwrap();
        assert!(applied.contains("FROM ubuntu:22.04"));
        assert!(applied.contains("rm -rf /var/lib/apt/lists/*"));
        // COPY untouched
        assert!(applied.contains("COPY . /app"));
    }

    #[test]
    fn test_dockerfile_without_from_errors() {
        let err = dockerfile_update(
            "RUN echo hi\n",
            Some(&BaseImagePin {
                image: "ubuntu".into(),
                tag: "22.04".into(),
            }),
            false,
        );
        assert!(matches!(err, Err(PatchError::MissingFromInstruction)));
    }

    #[test]
    fn test_remove_unused_import_variants() {
        let content = "import os\nimport sys, json\nfrom typing import List, Dict\n\nprint(sys.argv)\n";
        let applied = remove_unused_import(content, "os", None);
        assert!(!applied.contains("import os"));

        let applied = remove_unused_import(content, "json", None);
        assert!(applied.contains("import sys\n"));
        assert!(!applied.contains("json"));

        let applied = remove_unused_import(content, "List", Some("typing"));
        assert!(applied.contains("from typing import Dict"));
    }

    #[test]
    fn test_noop_operation_produces_no_diff() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("go.sum"), "existing entry\n").unwrap();
        let plan = plan_with(
            &["go.sum"],
            vec![FixOperation {
                op_type: OperationType::UpdateConfig,
                file: "go.sum".into(),
                details: OperationDetails::TouchFile {},
                rationale: "normalize".into(),
                evidence: vec![],
            }],
        );
        let output = PatchGenerator::new().generate(dir.path(), &plan).unwrap();
        assert!(output.diff_text.is_empty());
        assert_eq!(output.stats.total_files, 0);
    }

    #[test]
    fn test_whitespace_only_change_produces_no_diff() {
        let dir = tempfile::tempdir().unwrap();
        // Trailing spaces normalize away; the operation is a no-op on the
        // normalized content.
        std::fs::write(dir.path().join("go.sum"), "entry one   \nentry two\n").unwrap();
        let plan = plan_with(
            &["go.sum"],
            vec![FixOperation {
                op_type: OperationType::UpdateConfig,
                file: "go.sum".into(),
                details: OperationDetails::TouchFile {},
                rationale: "normalize".into(),
                evidence: vec![],
            }],
        );
        let output = PatchGenerator::new().generate(dir.path(), &plan).unwrap();
        assert!(output.diff_text.is_empty());
    }

    #[test]
    fn test_operation_outside_plan_files_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pyproject.toml"), "[tool.poetry.dependencies]\n").unwrap();
        let plan = plan_with(
            &["pyproject.toml"],
            vec![dep_op("requirements.txt", "requests", "==1.0.0")],
        );
        let err = PatchGenerator::new().generate(dir.path(), &plan);
        assert!(matches!(err, Err(PatchError::OperationOutsideFiles(_))));
    }

    #[test]
    fn test_missing_file_uses_empty_preimage() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan_with(
            &["requirements.txt"],
            vec![dep_op("requirements.txt", "requests", "==1.0.0")],
        );
        let output = PatchGenerator::new().generate(dir.path(), &plan).unwrap();
        assert!(output.diff_text.contains("+requests==1.0.0"));
        assert_eq!(output.stats.total_lines_added, 1);
    }

    #[test]
    fn test_stats_measure_combined_diff() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "flask==2.0\n").unwrap();
        let plan = plan_with(
            &["requirements.txt"],
            vec![dep_op("requirements.txt", "requests", "==1.0.0")],
        );
        let output = PatchGenerator::new().generate(dir.path(), &plan).unwrap();
        assert_eq!(output.stats.diff_bytes, output.diff_text.len() as u64);
        assert_eq!(output.stats.total_files, 1);
        let parsed = safety::parse_unified_diff(&output.diff_text).unwrap();
        assert_eq!(parsed.files[0].path, "requirements.txt");
    }
}
