//! Environment provisioning.
//!
//! One fresh, named container per package, configured to see the archive as
//! it was at the reference build time and holding exactly the recorded
//! build dependencies.

use std::path::PathBuf;
use std::sync::Arc;

use container_env::{ContainerError, ContainerRuntime, ContainerSpec, CpuAccounting};
use debrepro_core::{BuildDependency, SnapshotSet};
use tracing::{debug, info};
use uuid::Uuid;

use crate::runner::StepRunner;
use crate::stage::{EnvironmentSettings, ProvisionStep, StepConfig};
use crate::transcript::{sanitize, Transcript};

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("failed to start container {container}: {source}")]
    Start {
        container: String,
        #[source]
        source: ContainerError,
    },

    #[error("step {step} exited with code {exit_code}")]
    StepFailed { step: String, exit_code: i32 },

    #[error("step {step} could not run: {source}")]
    Runtime {
        step: String,
        #[source]
        source: ContainerError,
    },
}

/// A provisioned container, ready for building.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerHandle {
    pub name: String,
    /// Full runtime id, empty when the runtime did not report one.
    pub id: String,
    /// CPU accounting chosen for this container.
    pub accounting: CpuAccounting,
}

pub struct EnvironmentProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
    settings: EnvironmentSettings,
    cgroup_root: PathBuf,
}

impl EnvironmentProvisioner {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        settings: EnvironmentSettings,
        cgroup_root: PathBuf,
    ) -> Self {
        Self {
            runtime,
            settings,
            cgroup_root,
        }
    }

    pub fn settings(&self) -> &EnvironmentSettings {
        &self.settings
    }

    /// Unique container name for `package`.
    pub fn container_name(package: &str) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("debrepro-{}-{}", sanitize(package), &suffix[..8])
    }

    /// Start a container for `package` and configure it.
    ///
    /// On any failure, including a failed start, the container is removed
    /// before the error is returned.
    pub async fn provision(
        &self,
        package: &str,
        snapshots: &SnapshotSet,
        dependencies: &[BuildDependency],
        transcript: &mut Transcript,
    ) -> Result<ContainerHandle, ProvisionError> {
        let name = Self::container_name(package);
        let spec = ContainerSpec::new(name.clone(), self.settings.base_image.clone());
        if let Err(source) = self.runtime.run(&spec).await {
            // `run` may have created the container before failing to start it.
            self.teardown(package, &name).await;
            return Err(ProvisionError::Start {
                container: name,
                source,
            });
        }
        transcript.note(format!("container {name} from {}", spec.image));
        info!(package = %package, container = %name, snapshots = snapshots.len(), "Container started");

        match self.configure(&name, snapshots, dependencies, transcript).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.teardown(package, &name).await;
                Err(e)
            }
        }
    }

    async fn configure(
        &self,
        name: &str,
        snapshots: &SnapshotSet,
        dependencies: &[BuildDependency],
        transcript: &mut Transcript,
    ) -> Result<ContainerHandle, ProvisionError> {
        for step in ProvisionStep::ALL {
            let config = StepConfig::provision(step, &self.settings, snapshots, dependencies);
            let output = StepRunner::execute(self.runtime.as_ref(), name, &config, transcript)
                .await
                .map_err(|source| ProvisionError::Runtime {
                    step: config.name.clone(),
                    source,
                })?;
            if !output.passed() {
                return Err(ProvisionError::StepFailed {
                    step: config.name,
                    exit_code: output.exit_code,
                });
            }
        }

        let id = self
            .runtime
            .container_id(name)
            .await
            .map_err(|source| ProvisionError::Runtime {
                step: "inspect".to_string(),
                source,
            })?;
        let accounting = CpuAccounting::detect(&self.cgroup_root, &id);
        debug!(container = %name, accounting = accounting.source_name(), "CPU accounting selected");

        Ok(ContainerHandle {
            name: name.to_string(),
            id,
            accounting,
        })
    }

    /// Remove the container. Failures are logged, never returned.
    pub async fn teardown(&self, package: &str, container: &str) {
        match self.runtime.remove(container).await {
            Ok(()) => debug!(package = %package, container = %container, "Container removed"),
            Err(e) => debrepro_core::obs::emit_teardown_failed(package, container, &e),
        }
    }
}
