//! Per-package results of a verification run.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};
use crate::domain::package::PackageTarget;

/// Lowercase hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Accept any non-empty hex string; case is normalised.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() || !text.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidChecksum(text.to_string()));
        }
        Ok(Self(text.to_ascii_lowercase()))
    }

    /// Hex-encode raw digest bytes.
    pub fn from_digest(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cost of a rebuild in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BuildTiming {
    pub wall_secs: f64,
    pub user_secs: f64,
    pub system_secs: f64,
}

impl BuildTiming {
    /// Timing of a package that never reached the build.
    pub const ZERO: BuildTiming = BuildTiming {
        wall_secs: 0.0,
        user_secs: 0.0,
        system_secs: 0.0,
    };

    pub fn new(wall_secs: f64, user_secs: f64, system_secs: f64) -> Self {
        Self {
            wall_secs: wall_secs.max(0.0),
            user_secs: user_secs.max(0.0),
            system_secs: system_secs.max(0.0),
        }
    }
}

/// Verdict for one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Rebuilt artifact is bit-identical to the reference.
    Match,
    /// Rebuilt artifact hashes differently.
    Differ,
    /// No comparison possible.
    Fail,
}

impl Classification {
    /// Single-letter code used in the results file.
    pub fn code(&self) -> &'static str {
        match self {
            Classification::Match => "y",
            Classification::Differ => "n",
            Classification::Fail => "f",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Classification::Match => "match",
            Classification::Differ => "differ",
            Classification::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// Pipeline stage names used in failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Resolve,
    Provision,
    Build,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Resolve => "resolve",
            Stage::Provision => "provision",
            Stage::Build => "build",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a package ended up as `Fail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub reason: String,
}

impl StageFailure {
    pub fn new(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.reason)
    }
}

/// Classified result for one requested package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildOutcome {
    /// Requested package name.
    pub package: String,
    /// Absent when metadata could not be fetched.
    pub target: Option<Arc<PackageTarget>>,
    pub computed_hash: Option<Checksum>,
    pub timing: BuildTiming,
    pub classification: Classification,
    pub failure: Option<StageFailure>,
}

impl BuildOutcome {
    /// Outcome of a package that reached classification.
    pub fn classified(
        target: Arc<PackageTarget>,
        computed_hash: Option<Checksum>,
        timing: BuildTiming,
        classification: Classification,
    ) -> Self {
        Self {
            package: target.name.clone(),
            target: Some(target),
            computed_hash,
            timing,
            classification,
            failure: None,
        }
    }

    /// `Fail` outcome for a package whose pipeline stopped at `failure.stage`.
    pub fn failed(
        package: impl Into<String>,
        target: Option<Arc<PackageTarget>>,
        failure: StageFailure,
        timing: BuildTiming,
    ) -> Self {
        Self {
            package: package.into(),
            target,
            computed_hash: None,
            timing,
            classification: Classification::Fail,
            failure: Some(failure),
        }
    }

    /// Reference artifact filename, when known.
    pub fn artifact(&self) -> Option<&str> {
        self.target.as_ref().and_then(|t| t.artifact.as_deref())
    }

    /// Reference artifact size, when known.
    pub fn expected_size(&self) -> Option<u64> {
        self.target.as_ref().and_then(|t| t.expected_size)
    }
}

/// Ordered outcomes of a batch, one per processed package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    outcomes: Vec<BuildOutcome>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, outcome: BuildOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[BuildOutcome] {
        &self.outcomes
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuildOutcome> {
        self.outcomes.iter()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Number of outcomes with the given classification.
    pub fn count(&self, classification: Classification) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.classification == classification)
            .count()
    }

    /// Outcomes with the given classification, in processing order.
    pub fn with_classification(
        &self,
        classification: Classification,
    ) -> impl Iterator<Item = &BuildOutcome> {
        self.outcomes
            .iter()
            .filter(move |o| o.classification == classification)
    }
}

impl IntoIterator for ResultSet {
    type Item = BuildOutcome;
    type IntoIter = std::vec::IntoIter<BuildOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.into_iter()
    }
}
