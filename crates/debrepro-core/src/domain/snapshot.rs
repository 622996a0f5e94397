//! Archive snapshots approximating the reference build environment.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};

/// Maximum number of snapshots combined into one environment.
pub const MAX_SNAPSHOTS: usize = 3;

/// A point-in-time copy of the package archive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Snapshot {
    /// URL path fragment, e.g. `20170101T040541Z`.
    pub id: String,
    pub time: DateTime<Utc>,
}

impl Snapshot {
    /// Build a snapshot from its archive id, deriving the time from it.
    pub fn from_id(id: &str) -> Result<Self> {
        let time = NaiveDateTime::parse_from_str(id, "%Y%m%dT%H%M%SZ")
            .map_err(|_| DomainError::InvalidSnapshotId(id.to_string()))?
            .and_utc();
        Ok(Self {
            id: id.to_string(),
            time,
        })
    }
}

/// Two or three snapshots in ascending time order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSet {
    snapshots: Vec<Snapshot>,
}

impl SnapshotSet {
    pub fn new(snapshots: Vec<Snapshot>) -> Result<Self> {
        if snapshots.len() < 2 || snapshots.len() > MAX_SNAPSHOTS {
            return Err(DomainError::InvalidSnapshotSet(format!(
                "expected 2 to {MAX_SNAPSHOTS} snapshots, got {}",
                snapshots.len()
            )));
        }
        if snapshots.windows(2).any(|w| w[0].time > w[1].time) {
            return Err(DomainError::InvalidSnapshotSet(
                "snapshots are not in ascending time order".to_string(),
            ));
        }
        Ok(Self { snapshots })
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// `deb` and `deb-src` lines for every snapshot, oldest first.
    pub fn source_lines(&self, snapshot_base: &str, archive: &str, dist: &str) -> Vec<String> {
        let base = snapshot_base.trim_end_matches('/');
        self.snapshots
            .iter()
            .flat_map(|s| {
                let url = format!("{base}/archive/{archive}/{}", s.id);
                [
                    format!("deb {url} {dist} main"),
                    format!("deb-src {url} {dist} main"),
                ]
            })
            .collect()
    }
}
