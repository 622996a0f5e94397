//! Domain models for debrepro.
//!
//! Canonical definitions for the core entities:
//! - `PackageTarget`: what to rebuild and what it should hash to
//! - `SnapshotSet`: the archive state the reference build saw
//! - `BuildOutcome`: one classified result per requested package
//! - `ResultSet`: the ordered collection of outcomes for a batch

pub mod error;
pub mod outcome;
pub mod package;
pub mod snapshot;

// Re-export main types and errors
pub use error::{DomainError, Result};
pub use outcome::{
    BuildOutcome, BuildTiming, Checksum, Classification, ResultSet, Stage, StageFailure,
};
pub use package::{BuildDependency, BuildTimestamp, PackageTarget};
pub use snapshot::{Snapshot, SnapshotSet};
