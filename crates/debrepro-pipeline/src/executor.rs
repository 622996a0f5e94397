//! Rebuilds a package inside a provisioned container.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use container_env::{ContainerError, ContainerRuntime, CpuSample};
use debrepro_core::{BuildTiming, PackageTarget};
use tracing::info;

use crate::provision::ContainerHandle;
use crate::runner::StepRunner;
use crate::stage::{BuildStep, StepConfig, PROJECT_DIR};
use crate::transcript::{sanitize, Transcript};

/// A rebuild that did not produce a comparable artifact.
///
/// Every variant carries the timing measured up to the failure.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("{stage} exited with code {exit_code}")]
    StageFailed {
        stage: String,
        exit_code: i32,
        timing: BuildTiming,
    },

    #[error("{stage} could not run: {source}")]
    Runtime {
        stage: String,
        #[source]
        source: ContainerError,
        timing: BuildTiming,
    },

    #[error("artifact {artifact} not produced: {reason}")]
    MissingArtifact {
        artifact: String,
        reason: String,
        timing: BuildTiming,
    },
}

impl BuildError {
    pub fn timing(&self) -> BuildTiming {
        match self {
            BuildError::StageFailed { timing, .. }
            | BuildError::Runtime { timing, .. }
            | BuildError::MissingArtifact { timing, .. } => *timing,
        }
    }
}

/// Rebuilt artifact copied to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltArtifact {
    pub host_path: PathBuf,
    pub timing: BuildTiming,
}

/// Wall clock and CPU counters at the start of a build.
struct Meter<'a> {
    handle: &'a ContainerHandle,
    started: Instant,
    cpu: CpuSample,
}

impl<'a> Meter<'a> {
    fn start(handle: &'a ContainerHandle) -> Self {
        Self {
            handle,
            cpu: handle.accounting.sample(),
            started: Instant::now(),
        }
    }

    fn stop(&self) -> BuildTiming {
        let wall = self.started.elapsed().as_secs_f64();
        let cpu = self.handle.accounting.sample().delta_since(&self.cpu);
        BuildTiming::new(wall, cpu.user_secs, cpu.system_secs)
    }
}

pub struct BuildExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    build_timeout_secs: u64,
    artifact_dir: PathBuf,
}

impl BuildExecutor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        build_timeout_secs: u64,
        artifact_dir: PathBuf,
    ) -> Self {
        Self {
            runtime,
            build_timeout_secs,
            artifact_dir,
        }
    }

    /// Host location the artifact of `target` is copied to.
    pub fn host_path(&self, target: &PackageTarget, artifact: &str) -> PathBuf {
        self.artifact_dir
            .join(sanitize(&target.name))
            .join(sanitize(artifact))
    }

    /// Fetch sources, install build dependencies, build, copy the artifact out.
    pub async fn build(
        &self,
        handle: &ContainerHandle,
        target: &PackageTarget,
        transcript: &mut Transcript,
    ) -> Result<BuiltArtifact, BuildError> {
        let meter = Meter::start(handle);

        for step in BuildStep::ALL {
            let config = StepConfig::build(step, target, self.build_timeout_secs);
            let output = match StepRunner::execute(
                self.runtime.as_ref(),
                &handle.name,
                &config,
                transcript,
            )
            .await
            {
                Ok(output) => output,
                Err(source) => {
                    return Err(BuildError::Runtime {
                        stage: config.name,
                        source,
                        timing: meter.stop(),
                    })
                }
            };
            if !output.passed() {
                return Err(BuildError::StageFailed {
                    stage: config.name,
                    exit_code: output.exit_code,
                    timing: meter.stop(),
                });
            }
        }
        let timing = meter.stop();
        info!(
            package = %target.name,
            wall_secs = timing.wall_secs,
            user_secs = timing.user_secs,
            system_secs = timing.system_secs,
            "Build finished"
        );

        let Some(artifact) = target.artifact.as_deref() else {
            return Err(BuildError::MissingArtifact {
                artifact: format!("{}_{}", target.binary_name, target.short_version),
                reason: "no reference artifact name".to_string(),
                timing,
            });
        };
        let host_path = self.host_path(target, artifact);
        self.copy_out(handle, artifact, &host_path)
            .await
            .map_err(|e| BuildError::MissingArtifact {
                artifact: artifact.to_string(),
                reason: e.to_string(),
                timing,
            })?;

        Ok(BuiltArtifact { host_path, timing })
    }

    async fn copy_out(
        &self,
        handle: &ContainerHandle,
        artifact: &str,
        host_path: &Path,
    ) -> Result<(), ContainerError> {
        // A stale copy from an earlier run must never be hashed.
        match tokio::fs::remove_file(host_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let container_path = format!("{PROJECT_DIR}/{artifact}");
        self.runtime
            .copy_out(&handle.name, &container_path, host_path)
            .await
    }
}
