//! Container runtime abstraction.
//!
//! The pipeline only ever needs five operations from a runtime: start a
//! named container, run a command in it, copy a file out, look up its id
//! and destroy it. [`DockerCli`](crate::DockerCli) implements them on top of
//! the docker CLI; [`FakeRuntime`](crate::fakes::FakeRuntime) in memory.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A long-lived container to start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Unique container name.
    pub name: String,

    /// Pinned base image.
    pub image: String,

    /// Command keeping the container alive between `exec` calls.
    pub keepalive: Vec<String>,
}

impl ContainerSpec {
    /// Create a spec that keeps the container alive with `sleep infinity`.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            keepalive: vec!["sleep".to_string(), "infinity".to_string()],
        }
    }
}

/// A command to issue inside a running container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecRequest {
    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Working directory inside the container.
    pub workdir: Option<String>,

    /// Timeout in seconds; `None` uses the runtime default, `Some(0)` disables it.
    pub timeout_secs: Option<u64>,
}

impl ExecRequest {
    /// Create a request for an argv-style command.
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            workdir: None,
            timeout_secs: None,
        }
    }

    /// Create a request running `script` through `sh -c`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new(vec!["sh".to_string(), "-c".to_string(), script.into()])
    }

    /// Run the command from `dir`.
    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Override the timeout for this command.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    /// Human-readable command line for logs and transcripts.
    pub fn display(&self) -> String {
        self.command.join(" ")
    }
}

/// Captured result of an `exec`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code (0 = success, -1 when killed by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl ExecOutput {
    /// Whether the command exited with code 0.
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Operations the rebuild pipeline needs from a container runtime.
///
/// `exec` returns `Ok` for commands that ran to completion regardless of
/// their exit code; `Err` means the command could not be run at all
/// (runtime missing, timeout, unknown container).
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start a detached container from `spec`.
    async fn run(&self, spec: &ContainerSpec) -> Result<()>;

    /// Issue a command inside the named container.
    async fn exec(&self, name: &str, request: &ExecRequest) -> Result<ExecOutput>;

    /// Copy `container_path` out of the named container to `host_path`.
    async fn copy_out(&self, name: &str, container_path: &str, host_path: &Path) -> Result<()>;

    /// Full runtime id of the named container (used to locate CPU counters).
    async fn container_id(&self, name: &str) -> Result<String>;

    /// Destroy the named container, stopping it first if needed.
    async fn remove(&self, name: &str) -> Result<()>;
}
