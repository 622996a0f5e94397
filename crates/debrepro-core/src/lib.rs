//! debrepro core library
//!
//! Everything the verification pipeline knows about packages that does not
//! involve a container: reference metadata, archive snapshots, outcome
//! classification, result files, configuration and logging.

pub mod classify;
pub mod config;
pub mod domain;
pub mod fakes;
pub mod http;
pub mod metadata;
pub mod obs;
pub mod package_set;
pub mod sink;
pub mod snapshot;
pub mod telemetry;

pub use classify::{classify, sha256_file, verdict, Verdict};
pub use config::ReproConfig;
pub use domain::{
    BuildDependency, BuildOutcome, BuildTimestamp, BuildTiming, Checksum, Classification,
    DomainError, PackageTarget, ResultSet, Snapshot, SnapshotSet, Stage, StageFailure,
};
pub use http::{HttpError, HttpPageSource, PageSource};
pub use metadata::{FetchError, MetadataFetcher, ParseError};
pub use package_set::PackageSet;
pub use sink::{BatchSummary, CsvResultSink, ResultSink};
pub use snapshot::{ResolveError, SnapshotResolver};
