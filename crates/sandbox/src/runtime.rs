//! Pluggable container runtime.
//!
//! Two implementations: [`DockerRuntime`] drives the host docker daemon
//! through its CLI; [`MockRuntime`] replays scripted results and records
//! every call so the pipeline stays testable without root.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Errors from the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The daemon refused or the CLI failed outright.
    #[error("container runtime failure: {0}")]
    Daemon(String),
    /// Spawning the CLI failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The mock ran out of scripted responses.
    #[error("no scripted response for exec of `{0}`")]
    ScriptExhausted(String),
}

impl RuntimeError {
    /// Whether the failure is plausibly transient (daemon hiccup).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Daemon(_) | Self::Io(_))
    }
}

/// How to build the sandbox container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Image to run
    pub image: String,
    /// Host path mounted read-write at `workdir`
    pub mount_path: PathBuf,
    /// Working directory inside the container
    pub workdir: String,
    /// Memory quota (docker syntax, e.g. `1g`)
    pub memory_limit: String,
    /// CPU quota (docker syntax, e.g. `1.5`)
    pub cpu_limit: String,
    /// Whether the container may reach the network
    pub allow_network: bool,
}

impl ContainerSpec {
    /// Spec with the standard hardening and `/workspace` mount.
    #[must_use]
    pub fn workspace(image: &str, mount_path: PathBuf, allow_network: bool) -> Self {
        Self {
            image: image.to_string(),
            mount_path,
            workdir: "/workspace".to_string(),
            memory_limit: "1g".to_string(),
            cpu_limit: "2".to_string(),
            allow_network,
        }
    }
}

/// A created container.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    /// Runtime-assigned identifier
    pub id: String,
}

/// Result of one command inside the container.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Exit code; `None` when the process was killed
    pub exit_code: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Whether the deadline expired
    pub timed_out: bool,
}

impl ExecResult {
    /// Whether the command completed successfully.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

/// The runtime seam the validator drives.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a container per `spec`.
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError>;

    /// Run a command inside the container under a deadline.
    async fn exec(
        &self,
        handle: &ContainerHandle,
        command: &[String],
        timeout: Duration,
    ) -> Result<ExecResult, RuntimeError>;

    /// Collect the container's accumulated output.
    async fn logs(&self, handle: &ContainerHandle) -> Result<String, RuntimeError>;

    /// Stop and remove the container.
    async fn cleanup(&self, handle: &ContainerHandle);
}

/// Drives the host docker daemon through the `docker` CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct DockerRuntime;

impl DockerRuntime {
    async fn docker(args: &[String]) -> Result<std::process::Output, RuntimeError> {
        let output = Command::new("docker")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(output)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--cap-drop=ALL".into(),
            "--security-opt".into(),
            "no-new-privileges".into(),
            "--memory".into(),
            spec.memory_limit.clone(),
            "--cpus".into(),
            spec.cpu_limit.clone(),
            "-v".into(),
            format!("{}:{}:rw", spec.mount_path.display(), spec.workdir),
            "-w".into(),
            spec.workdir.clone(),
        ];
        if !spec.allow_network {
            args.push("--network".into());
            args.push("none".into());
        }
        args.push(spec.image.clone());
        // Keep the container alive for subsequent execs
        args.push("sleep".into());
        args.push("infinity".into());

        let output = Self::docker(&args).await?;
        if !output.status.success() {
            return Err(RuntimeError::Daemon(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(container = %id, image = %spec.image, "Created sandbox container");
        Ok(ContainerHandle { id })
    }

    async fn exec(
        &self,
        handle: &ContainerHandle,
        command: &[String],
        timeout: Duration,
    ) -> Result<ExecResult, RuntimeError> {
        let mut args: Vec<String> = vec!["exec".into(), handle.id.clone()];
        args.extend(command.iter().cloned());

        match tokio::time::timeout(timeout, Self::docker(&args)).await {
            Ok(output) => {
                let output = output?;
                Ok(ExecResult {
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    timed_out: false,
                })
            }
            Err(_) => Ok(ExecResult {
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                timed_out: true,
            }),
        }
    }

    async fn logs(&self, handle: &ContainerHandle) -> Result<String, RuntimeError> {
        let output = Self::docker(&["logs".into(), handle.id.clone()]).await?;
        if !output.status.success() {
            return Err(RuntimeError::Daemon(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn cleanup(&self, handle: &ContainerHandle) {
        match Self::docker(&["rm".into(), "-f".into(), handle.id.clone()]).await {
            Ok(output) if !output.status.success() => {
                warn!(
                    container = %handle.id,
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "Failed to remove sandbox container"
                );
            }
            Err(e) => warn!(container = %handle.id, error = %e, "Failed to remove sandbox container"),
            Ok(_) => {}
        }
    }
}

/// One scripted exec response for [`MockRuntime`].
#[derive(Debug, Clone)]
pub struct ScriptedExec {
    /// Matches when the command's first token equals this (empty = any)
    pub command_prefix: String,
    /// Result to replay
    pub result: ExecResult,
}

/// Record-and-replay runtime for tests and offline runs.
#[derive(Default)]
pub struct MockRuntime {
    script: Mutex<Vec<ScriptedExec>>,
    calls: Mutex<Vec<Vec<String>>>,
    log_buffer: Mutex<String>,
}

impl MockRuntime {
    /// A runtime that replays `script` in order.
    #[must_use]
    pub fn with_script(script: Vec<ScriptedExec>) -> Self {
        Self {
            script: Mutex::new(script),
            calls: Mutex::new(Vec::new()),
            log_buffer: Mutex::new(String::new()),
        }
    }

    /// A runtime where every command succeeds with the given stdout.
    #[must_use]
    pub fn always_passing(stdout: &str) -> Self {
        Self::with_script(vec![ScriptedExec {
            command_prefix: String::new(),
            result: ExecResult {
                exit_code: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
                timed_out: false,
            },
        }])
    }

    /// Every command recorded so far.
    #[must_use]
    pub fn recorded_calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().expect("mock lock").clone()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create(&self, _spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        Ok(ContainerHandle {
            id: "mock-container".to_string(),
        })
    }

    async fn exec(
        &self,
        _handle: &ContainerHandle,
        command: &[String],
        _timeout: Duration,
    ) -> Result<ExecResult, RuntimeError> {
        self.calls
            .lock()
            .expect("mock lock")
            .push(command.to_vec());

        let mut script = self.script.lock().expect("mock lock");
        let first = command.first().cloned().unwrap_or_default();
        if let Some(pos) = script
            .iter()
            .position(|s| s.command_prefix.is_empty() || s.command_prefix == first)
        {
            // Replay without consuming a catch-all entry at the end
            let entry = script[pos].clone();
            if script.len() > 1 || !entry.command_prefix.is_empty() {
                script.remove(pos);
            }
            let mut buffer = self.log_buffer.lock().expect("mock lock");
            buffer.push_str(&entry.result.stdout);
            buffer.push('\n');
            return Ok(entry.result);
        }
        Err(RuntimeError::ScriptExhausted(first))
    }

    async fn logs(&self, _handle: &ContainerHandle) -> Result<String, RuntimeError> {
        Ok(self.log_buffer.lock().expect("mock lock").clone())
    }

    async fn cleanup(&self, _handle: &ContainerHandle) {}
}
