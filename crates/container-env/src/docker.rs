//! Docker CLI runtime
//!
//! Drives the `docker` binary (or any CLI-compatible runtime such as
//! `podman`) as a subprocess. Every invocation runs under a timeout and the
//! child is killed if the timeout fires.

use crate::error::ContainerError;
use crate::runtime::{ContainerRuntime, ContainerSpec, ExecOutput, ExecRequest};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// Longest stderr excerpt carried inside an error message.
const MAX_STDERR_BYTES: usize = 4 * 1024;

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime binary (`docker`, `podman`, ...)
    pub binary: String,
    /// Default ceiling for `exec` commands, 0 disables it
    pub command_timeout_secs: u64,
    /// Ceiling for bookkeeping commands (`run`, `cp`, `rm`, `inspect`).
    /// `run` includes pulling the image when it is not present.
    pub control_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            binary: "docker".to_string(),
            command_timeout_secs: 1800,
            control_timeout_secs: 600,
        }
    }
}

impl RuntimeConfig {
    /// Create config for a specific runtime binary
    pub fn new(binary: &str) -> Self {
        RuntimeConfig {
            binary: binary.to_string(),
            ..Self::default()
        }
    }

    /// Set the default exec timeout
    pub fn with_command_timeout(mut self, secs: u64) -> Self {
        self.command_timeout_secs = secs;
        self
    }

    /// Set the bookkeeping timeout
    pub fn with_control_timeout(mut self, secs: u64) -> Self {
        self.control_timeout_secs = secs;
        self
    }
}

/// Docker CLI client
pub struct DockerCli {
    config: RuntimeConfig,
}

impl DockerCli {
    /// Create a new client
    pub fn new(config: RuntimeConfig) -> Self {
        DockerCli { config }
    }

    fn run_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            spec.image.clone(),
        ];
        args.extend(spec.keepalive.iter().cloned());
        args
    }

    fn exec_args(name: &str, request: &ExecRequest) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if let Some(dir) = &request.workdir {
            args.push("-w".to_string());
            args.push(dir.clone());
        }
        args.push(name.to_string());
        args.extend(request.command.iter().cloned());
        args
    }

    fn copy_args(name: &str, container_path: &str, host_path: &Path) -> Vec<String> {
        vec![
            "cp".to_string(),
            format!("{name}:{container_path}"),
            host_path.to_string_lossy().to_string(),
        ]
    }

    fn remove_args(name: &str) -> Vec<String> {
        vec!["rm".to_string(), "-f".to_string(), name.to_string()]
    }

    fn inspect_args(name: &str) -> Vec<String> {
        vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{.Id}}".to_string(),
            name.to_string(),
        ]
    }

    /// Spawn the runtime with `args`, returning the captured output.
    async fn invoke(&self, args: &[String], timeout_secs: u64) -> Result<ExecOutput> {
        let start = Instant::now();
        let command_line = format!("{} {}", self.config.binary, args.join(" "));
        debug!(command = %command_line, "Invoking container runtime");

        let child = Command::new(&self.config.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ContainerError::RuntimeNotFound(self.config.binary.clone())
                } else {
                    ContainerError::Io(e)
                }
            })?;

        let output = if timeout_secs > 0 {
            tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
                .await
                .map_err(|_| ContainerError::Timeout {
                    command: command_line.clone(),
                    timeout_secs,
                })??
        } else {
            child.wait_with_output().await?
        };

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Like [`invoke`](Self::invoke) but non-zero exit is an error.
    async fn invoke_checked(&self, args: &[String], timeout_secs: u64) -> Result<ExecOutput> {
        let output = self.invoke(args, timeout_secs).await?;
        if output.passed() {
            Ok(output)
        } else {
            Err(ContainerError::CommandFailed {
                command: format!("{} {}", self.config.binary, args.join(" ")),
                exit_code: output.exit_code,
                stderr: truncate_stderr(&output.stderr),
            })
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn run(&self, spec: &ContainerSpec) -> Result<()> {
        self.invoke_checked(&Self::run_args(spec), self.config.control_timeout_secs)
            .await?;
        Ok(())
    }

    async fn exec(&self, name: &str, request: &ExecRequest) -> Result<ExecOutput> {
        if request.command.is_empty() {
            return Err(ContainerError::InvalidCommand(format!(
                "empty command for container {name}"
            )));
        }
        let timeout = request
            .timeout_secs
            .unwrap_or(self.config.command_timeout_secs);
        self.invoke(&Self::exec_args(name, request), timeout).await
    }

    async fn copy_out(&self, name: &str, container_path: &str, host_path: &Path) -> Result<()> {
        if let Some(parent) = host_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.invoke_checked(
            &Self::copy_args(name, container_path, host_path),
            self.config.control_timeout_secs,
        )
        .await?;
        Ok(())
    }

    async fn container_id(&self, name: &str) -> Result<String> {
        let output = self
            .invoke_checked(&Self::inspect_args(name), self.config.control_timeout_secs)
            .await?;
        let id = output.stdout.trim().to_string();
        if id.is_empty() {
            warn!(container = %name, "Runtime returned an empty container id");
        }
        Ok(id)
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.invoke_checked(&Self::remove_args(name), self.config.control_timeout_secs)
            .await?;
        Ok(())
    }
}

/// Check whether the runtime binary answers `--version`.
pub fn is_runtime_available(binary: &str) -> bool {
    std::process::Command::new(binary)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn truncate_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.len() <= MAX_STDERR_BYTES {
        return trimmed.to_string();
    }
    let mut cut = MAX_STDERR_BYTES;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[TRUNCATED]", &trimmed[..cut])
}
