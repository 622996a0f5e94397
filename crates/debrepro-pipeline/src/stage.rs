//! Provisioning and build step definitions.

use container_env::ExecRequest;
use debrepro_core::{BuildDependency, PackageTarget, SnapshotSet};
use serde::{Deserialize, Serialize};

/// Workspace inside the container where sources are unpacked and built.
pub const PROJECT_DIR: &str = "/project";

pub const SOURCES_LIST: &str = "/etc/apt/sources.list";

/// apt configuration accepting snapshot `Release` files past their expiry.
pub const VALID_UNTIL_CONF: &str = "/etc/apt/apt.conf.d/10no-check-valid-until";

/// Settings shared by every provisioned environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentSettings {
    pub base_image: String,
    pub snapshot_base: String,
    pub archive: String,
    pub dist: String,
    /// Installed alongside the recorded dependencies.
    pub toolchain: Vec<String>,
    pub command_timeout_secs: u64,
}

/// Commands that turn a base image into the reference build environment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStep {
    /// Replace `sources.list` with the snapshot entries
    ConfigureSources,

    /// Accept expired snapshot `Release` files
    DisableValidUntil,

    /// apt-get update
    UpdateIndex,

    /// mkdir -p /project
    CreateWorkspace,

    /// apt-get install of the toolchain and every recorded dependency
    InstallDependencies,
}

impl ProvisionStep {
    pub const ALL: [ProvisionStep; 5] = [
        ProvisionStep::ConfigureSources,
        ProvisionStep::DisableValidUntil,
        ProvisionStep::UpdateIndex,
        ProvisionStep::CreateWorkspace,
        ProvisionStep::InstallDependencies,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProvisionStep::ConfigureSources => "configure_sources",
            ProvisionStep::DisableValidUntil => "disable_valid_until",
            ProvisionStep::UpdateIndex => "update_index",
            ProvisionStep::CreateWorkspace => "create_workspace",
            ProvisionStep::InstallDependencies => "install_dependencies",
        }
    }

    pub fn command(
        &self,
        settings: &EnvironmentSettings,
        snapshots: &SnapshotSet,
        dependencies: &[BuildDependency],
    ) -> Vec<String> {
        match self {
            ProvisionStep::ConfigureSources => {
                let lines = snapshots.source_lines(
                    &settings.snapshot_base,
                    &settings.archive,
                    &settings.dist,
                );
                let quoted: Vec<String> = lines.iter().map(|l| shell_quote(l)).collect();
                sh(format!(
                    ": > {SOURCES_LIST} && printf '%s\\n' {} >> {SOURCES_LIST}",
                    quoted.join(" ")
                ))
            }
            ProvisionStep::DisableValidUntil => sh(format!(
                "printf '%s\\n' {} > {VALID_UNTIL_CONF}",
                shell_quote("Acquire::Check-Valid-Until \"false\";")
            )),
            ProvisionStep::UpdateIndex => argv(&["apt-get", "update"]),
            ProvisionStep::CreateWorkspace => argv(&["mkdir", "-p", PROJECT_DIR]),
            ProvisionStep::InstallDependencies => {
                let mut command = apt_noninteractive(&[
                    "install",
                    "-y",
                    "--allow-downgrades",
                    "--no-install-recommends",
                ]);
                command.extend(settings.toolchain.iter().cloned());
                command.extend(dependencies.iter().map(BuildDependency::apt_spec));
                command
            }
        }
    }
}

/// Commands that rebuild the package from source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuildStep {
    /// apt-get source binary=version
    FetchSource,

    /// apt-get build-dep -y binary=version
    InstallBuildDeps,

    /// dpkg-buildpackage -us -uc -tc
    BuildPackage,
}

impl BuildStep {
    pub const ALL: [BuildStep; 3] = [
        BuildStep::FetchSource,
        BuildStep::InstallBuildDeps,
        BuildStep::BuildPackage,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BuildStep::FetchSource => "fetch_source",
            BuildStep::InstallBuildDeps => "install_build_deps",
            BuildStep::BuildPackage => "build_package",
        }
    }

    pub fn command(&self, target: &PackageTarget) -> Vec<String> {
        match self {
            BuildStep::FetchSource => {
                let mut command = argv(&["apt-get", "source"]);
                command.push(target.apt_spec());
                command
            }
            BuildStep::InstallBuildDeps => {
                let mut command =
                    apt_noninteractive(&["build-dep", "-y", "--allow-downgrades"]);
                command.push(target.apt_spec());
                command
            }
            BuildStep::BuildPackage => argv(&["dpkg-buildpackage", "-us", "-uc", "-tc"]),
        }
    }

    pub fn workdir(&self, target: &PackageTarget) -> String {
        match self {
            BuildStep::BuildPackage => format!("{PROJECT_DIR}/{}", target.build_dir()),
            _ => PROJECT_DIR.to_string(),
        }
    }
}

/// One command ready to be issued into a container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepConfig {
    /// Step name used in errors and transcripts.
    pub name: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Working directory inside the container.
    pub workdir: Option<String>,

    /// Timeout in seconds, 0 disables it.
    pub timeout_secs: u64,
}

impl StepConfig {
    pub fn provision(
        step: ProvisionStep,
        settings: &EnvironmentSettings,
        snapshots: &SnapshotSet,
        dependencies: &[BuildDependency],
    ) -> Self {
        Self {
            name: step.name().to_string(),
            command: step.command(settings, snapshots, dependencies),
            workdir: None,
            timeout_secs: settings.command_timeout_secs,
        }
    }

    pub fn build(step: BuildStep, target: &PackageTarget, timeout_secs: u64) -> Self {
        Self {
            name: step.name().to_string(),
            command: step.command(target),
            workdir: Some(step.workdir(target)),
            timeout_secs,
        }
    }

    pub fn to_request(&self) -> ExecRequest {
        let request = ExecRequest::new(self.command.clone()).with_timeout(self.timeout_secs);
        match &self.workdir {
            Some(dir) => request.in_dir(dir.clone()),
            None => request,
        }
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

fn sh(script: String) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script]
}

fn apt_noninteractive(args: &[&str]) -> Vec<String> {
    let mut command = argv(&["env", "DEBIAN_FRONTEND=noninteractive", "apt-get"]);
    command.extend(args.iter().map(|a| a.to_string()));
    command
}

/// Single-quote `s` for `sh`.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
