//! debrepro pipeline
//!
//! Per package: fetch reference metadata, resolve archive snapshots,
//! provision a pinned container, rebuild, classify. One package's failure is
//! recorded as its outcome and never stops the batch.

pub mod executor;
pub mod pipeline;
pub mod provision;
pub mod runner;
pub mod stage;
pub mod transcript;

pub use executor::{BuildError, BuildExecutor, BuiltArtifact};
pub use pipeline::VerificationPipeline;
pub use provision::{ContainerHandle, EnvironmentProvisioner, ProvisionError};
pub use runner::StepRunner;
pub use stage::{BuildStep, EnvironmentSettings, ProvisionStep, StepConfig};
pub use transcript::Transcript;
