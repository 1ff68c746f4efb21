//! Ephemeral sandbox validation.
//!
//! The validator clones the repository, applies the candidate patch,
//! detects the test framework, runs install and test steps inside a locked-
//! down container, runs security scans over the patched tree, and maps the
//! whole sequence to a [`schemas::ValidationResult`].

pub mod runtime;
pub mod scans;
pub mod test_runner;
pub mod validator;

pub use runtime::{
    ContainerHandle, ContainerRuntime, ContainerSpec, DockerRuntime, ExecResult, MockRuntime,
    RuntimeError, ScriptedExec,
};
pub use test_runner::{detect_framework, framework_steps, parse_test_counts, TestCounts};
pub use validator::ValidationOrchestrator;
