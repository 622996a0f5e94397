//! In-memory container runtime (testing only)
//!
//! `FakeRuntime` satisfies the [`ContainerRuntime`] contract without a
//! container daemon. It records every call, can be scripted to fail commands
//! and serves artifact bytes for `copy_out`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::accounting::CpuSample;
use crate::error::ContainerError;
use crate::runtime::{ContainerRuntime, ContainerSpec, ExecOutput, ExecRequest};
use crate::Result;

/// One recorded runtime operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Run { name: String, image: String },
    Exec {
        name: String,
        command: String,
        workdir: Option<String>,
    },
    CopyOut { name: String, path: String },
    Inspect { name: String },
    Remove { name: String },
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<RuntimeCall>,
    live: HashSet<String>,
    cpu_usec: HashMap<String, (u64, u64)>,
}

/// Per-container cgroup v2 counters kept under a scratch root.
#[derive(Debug, Clone)]
struct CgroupCounters {
    root: PathBuf,
    user_usec_per_exec: u64,
    system_usec_per_exec: u64,
}

impl CgroupCounters {
    fn stat_path(&self, name: &str) -> PathBuf {
        self.root
            .join("system.slice")
            .join(format!("docker-fake{name}.scope"))
            .join("cpu.stat")
    }

    fn write(&self, name: &str, (user, system): (u64, u64)) -> std::io::Result<()> {
        let path = self.stat_path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(
            path,
            format!("usage_usec {}\nuser_usec {user}\nsystem_usec {system}\n", user + system),
        )
    }
}

/// Scripted in-memory runtime.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
    exec_failures: Vec<(String, i32)>,
    artifacts: HashMap<String, Vec<u8>>,
    fail_run: bool,
    cgroup: Option<CgroupCounters>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any `exec` whose command line contains `needle` exits with `exit_code`.
    pub fn with_failing_exec(mut self, needle: &str, exit_code: i32) -> Self {
        self.exec_failures.push((needle.to_string(), exit_code));
        self
    }

    /// Serve `bytes` for `copy_out` of `container_path`.
    pub fn with_artifact(mut self, container_path: &str, bytes: &[u8]) -> Self {
        self.artifacts
            .insert(container_path.to_string(), bytes.to_vec());
        self
    }

    /// Make every `run` fail after the container was created, the way
    /// `docker run` does when the container cannot be started.
    pub fn with_failing_run(mut self) -> Self {
        self.fail_run = true;
        self
    }

    /// Expose a cgroup v2 `cpu.stat` per container under `cgroup_root`, the
    /// way the systemd cgroup driver lays it out. Every `exec` charges
    /// `per_exec` to the container.
    pub fn with_cgroup_counters(mut self, cgroup_root: &Path, per_exec: CpuSample) -> Self {
        self.cgroup = Some(CgroupCounters {
            root: cgroup_root.to_path_buf(),
            user_usec_per_exec: (per_exec.user_secs * 1_000_000.0) as u64,
            system_usec_per_exec: (per_exec.system_secs * 1_000_000.0) as u64,
        });
        self
    }

    /// Every call recorded so far, in order.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Command lines issued into `name`, in order.
    pub fn exec_commands(&self, name: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RuntimeCall::Exec {
                    name: n, command, ..
                } if n == name => Some(command),
                _ => None,
            })
            .collect()
    }

    /// Names of containers started, in order.
    pub fn started(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RuntimeCall::Run { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    /// Names of containers removed, in order.
    pub fn removed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RuntimeCall::Remove { name } => Some(name),
                _ => None,
            })
            .collect()
    }

    /// Containers started and not yet removed.
    pub fn live_containers(&self) -> Vec<String> {
        let mut live: Vec<String> = self.state.lock().unwrap().live.iter().cloned().collect();
        live.sort();
        live
    }

    fn ensure_live(state: &FakeState, name: &str, command: &str) -> Result<()> {
        if state.live.contains(name) {
            Ok(())
        } else {
            Err(ContainerError::CommandFailed {
                command: command.to_string(),
                exit_code: 1,
                stderr: format!("Error: No such container: {name}"),
            })
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn run(&self, spec: &ContainerSpec) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RuntimeCall::Run {
            name: spec.name.clone(),
            image: spec.image.clone(),
        });
        if !state.live.insert(spec.name.clone()) {
            return Err(ContainerError::CommandFailed {
                command: format!("run {}", spec.name),
                exit_code: 125,
                stderr: format!("Conflict. The container name \"/{}\" is already in use", spec.name),
            });
        }
        if let Some(cgroup) = &self.cgroup {
            state.cpu_usec.insert(spec.name.clone(), (0, 0));
            cgroup.write(&spec.name, (0, 0))?;
        }
        if self.fail_run {
            return Err(ContainerError::CommandFailed {
                command: format!("run {}", spec.name),
                exit_code: 127,
                stderr: "OCI runtime create failed: exec: \"sleep\": executable file not found"
                    .to_string(),
            });
        }
        Ok(())
    }

    async fn exec(&self, name: &str, request: &ExecRequest) -> Result<ExecOutput> {
        if request.command.is_empty() {
            return Err(ContainerError::InvalidCommand(format!(
                "empty command for container {name}"
            )));
        }
        let command = request.display();
        let mut state = self.state.lock().unwrap();
        state.calls.push(RuntimeCall::Exec {
            name: name.to_string(),
            command: command.clone(),
            workdir: request.workdir.clone(),
        });
        Self::ensure_live(&state, name, &command)?;
        if let Some(cgroup) = &self.cgroup {
            let counters = state.cpu_usec.entry(name.to_string()).or_default();
            counters.0 += cgroup.user_usec_per_exec;
            counters.1 += cgroup.system_usec_per_exec;
            cgroup.write(name, *counters)?;
        }

        let failure = self
            .exec_failures
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()));
        Ok(match failure {
            Some((needle, exit_code)) => ExecOutput {
                exit_code: *exit_code,
                stdout: String::new(),
                stderr: format!("scripted failure for `{needle}`"),
                duration_ms: 1,
            },
            None => ExecOutput {
                exit_code: 0,
                stdout: format!("ok: {command}\n"),
                stderr: String::new(),
                duration_ms: 1,
            },
        })
    }

    async fn copy_out(&self, name: &str, container_path: &str, host_path: &Path) -> Result<()> {
        let command = format!("cp {name}:{container_path}");
        {
            let mut state = self.state.lock().unwrap();
            state.calls.push(RuntimeCall::CopyOut {
                name: name.to_string(),
                path: container_path.to_string(),
            });
            Self::ensure_live(&state, name, &command)?;
        }

        let bytes = self
            .artifacts
            .get(container_path)
            .ok_or_else(|| ContainerError::CommandFailed {
                command,
                exit_code: 1,
                stderr: format!("Error: Could not find the file {container_path} in container {name}"),
            })?;
        if let Some(parent) = host_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(host_path, bytes)?;
        Ok(())
    }

    async fn container_id(&self, name: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RuntimeCall::Inspect {
            name: name.to_string(),
        });
        Self::ensure_live(&state, name, &format!("inspect {name}"))?;
        Ok(format!("fake{name}"))
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RuntimeCall::Remove {
            name: name.to_string(),
        });
        if state.live.remove(name) {
            Ok(())
        } else {
            Err(ContainerError::CommandFailed {
                command: format!("rm -f {name}"),
                exit_code: 1,
                stderr: format!("Error: No such container: {name}"),
            })
        }
    }
}
