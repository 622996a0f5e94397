//! Container-Env: isolated rebuild environments for debrepro
//!
//! This crate provides the environment layer of the verification pipeline.
//! It drives a container runtime CLI (`docker` by default) and exposes the
//! per-container CPU counters used to account for build cost.
//!
//! ## Layer 1 - Environment
//!
//! Focus: one named, long-lived container per package and accounting that
//! never leaks between containers.

pub mod accounting;
pub mod docker;
pub mod error;
pub mod fakes;
pub mod runtime;

pub use accounting::{CgroupFormat, CpuAccounting, CpuSample};
pub use docker::{is_runtime_available, DockerCli, RuntimeConfig};
pub use error::ContainerError;
pub use runtime::{ContainerRuntime, ContainerSpec, ExecOutput, ExecRequest};

/// Result type for container operations
pub type Result<T> = std::result::Result<T, ContainerError>;
