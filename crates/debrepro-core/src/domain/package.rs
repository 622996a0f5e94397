//! The package under verification.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};
use crate::domain::outcome::Checksum;

/// UTC wall-clock time at which the reference build ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BuildTimestamp(DateTime<Utc>);

impl BuildTimestamp {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self(time)
    }

    /// Parse `YYYY-MM-DD HH:MM`, seconds optional.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M"))
            .map(|naive| Self(naive.and_utc()))
            .map_err(|_| DomainError::InvalidTimestamp(text.to_string()))
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for BuildTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

/// One entry of `Installed-Build-Depends`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDependency {
    pub name: String,
    /// Exact version the reference build had installed, when pinned.
    pub version: Option<String>,
}

impl BuildDependency {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// `name=version` as understood by `apt-get install`, or the bare name.
    pub fn apt_spec(&self) -> String {
        match &self.version {
            Some(version) => format!("{}={}", self.name, version),
            None => self.name.clone(),
        }
    }
}

/// Everything needed to rebuild one package and check the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageTarget {
    /// Requested name, as known to the reference site.
    pub name: String,

    /// Full version, possibly with an epoch (`1:2.4.47-2`).
    pub version: String,

    /// Version with the epoch stripped (`2.4.47-2`).
    pub short_version: String,

    /// Binary package whose artifact is compared.
    pub binary_name: String,

    /// Source package name.
    pub source_dir: String,

    /// `.deb` filename of the reference artifact.
    pub artifact: Option<String>,

    /// Checksum published by the reference build.
    pub expected_hash: Option<Checksum>,

    /// Size in bytes of the reference artifact (informational).
    pub expected_size: Option<u64>,

    /// Exact build environment of the reference build, in listed order.
    pub dependencies: Vec<BuildDependency>,

    /// When the reference build ran.
    pub build_time: BuildTimestamp,
}

impl PackageTarget {
    /// Short version up to the first `-` (the Debian revision is dropped).
    pub fn upstream_version(&self) -> &str {
        self.short_version
            .split_once('-')
            .map(|(upstream, _)| upstream)
            .unwrap_or(&self.short_version)
    }

    /// Directory `apt-get source` unpacks into.
    pub fn build_dir(&self) -> String {
        format!("{}-{}", self.source_dir, self.upstream_version())
    }

    /// `binary=version` as understood by `apt-get source` and `build-dep`.
    pub fn apt_spec(&self) -> String {
        format!("{}={}", self.binary_name, self.version)
    }
}
