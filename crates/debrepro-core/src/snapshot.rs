//! Snapshot resolution.
//!
//! The archive publishes one listing page per month. The resolver reads the
//! month(s) around the reference build time and picks the snapshots that
//! bracket it: the two latest strictly before, plus the earliest at or after.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use chrono::{Datelike, Duration};
use regex::Regex;
use tracing::debug;

use crate::config::ReproConfig;
use crate::domain::{BuildTimestamp, DomainError, Snapshot, SnapshotSet};
use crate::http::{HttpError, PageSource};

/// Number of snapshots taken from before the build time.
const SNAPSHOTS_BEFORE: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("no snapshot before {0}")]
    NoSnapshotBefore(BuildTimestamp),

    #[error("no snapshot at or after {0}")]
    NoSnapshotAfter(BuildTimestamp),

    #[error(transparent)]
    Invalid(#[from] DomainError),
}

/// Resolves archive snapshots for a build time.
pub struct SnapshotResolver {
    pages: Arc<dyn PageSource>,
    snapshot_base: String,
    archive: String,
}

impl SnapshotResolver {
    pub fn new(pages: Arc<dyn PageSource>, snapshot_base: &str, archive: &str) -> Self {
        Self {
            pages,
            snapshot_base: snapshot_base.trim_end_matches('/').to_string(),
            archive: archive.to_string(),
        }
    }

    pub fn from_config(pages: Arc<dyn PageSource>, config: &ReproConfig) -> Self {
        Self::new(pages, &config.snapshot_base, &config.archive)
    }

    /// Listing URL for one month.
    pub fn listing_url(&self, year: i32, month: u32) -> String {
        format!(
            "{}/archive/{}/?year={year};month={month:02}",
            self.snapshot_base, self.archive
        )
    }

    pub async fn resolve(&self, build_time: BuildTimestamp) -> Result<SnapshotSet, ResolveError> {
        let mut entries = BTreeSet::new();
        for (year, month) in months_spanning(build_time) {
            let url = self.listing_url(year, month);
            let page = self.pages.get_text(&url).await?;
            let found = parse_listing(&page);
            debug!(url = %url, snapshots = found.len(), "Read snapshot listing");
            entries.extend(found);
        }
        let entries: Vec<Snapshot> = entries.into_iter().collect();
        select_snapshots(&entries, build_time)
    }
}

/// Distinct `(year, month)` pairs covering one day either side of `build_time`.
pub fn months_spanning(build_time: BuildTimestamp) -> Vec<(i32, u32)> {
    let time = build_time.as_datetime();
    let mut months: Vec<(i32, u32)> = [time - Duration::days(1), time, time + Duration::days(1)]
        .iter()
        .map(|t| (t.year(), t.month()))
        .collect();
    months.dedup();
    months
}

/// Every snapshot anchor (`href="YYYYMMDDTHHMMSSZ/"`) on a listing page, sorted.
pub fn parse_listing(html: &str) -> Vec<Snapshot> {
    static CELL: OnceLock<Regex> = OnceLock::new();
    let anchor = CELL.get_or_init(|| {
        Regex::new(r#"href\s*=\s*"(?:[^"]*/)?(\d{8}T\d{6}Z)/""#)
            .unwrap_or_else(|e| panic!("bad snapshot pattern: {e}"))
    });

    let set: BTreeSet<Snapshot> = anchor
        .captures_iter(html)
        .filter_map(|caps| Snapshot::from_id(&caps[1]).ok())
        .collect();
    set.into_iter().collect()
}

/// Two latest entries strictly before `build_time` plus the earliest at or after it.
///
/// `entries` must be sorted ascending.
pub fn select_snapshots(
    entries: &[Snapshot],
    build_time: BuildTimestamp,
) -> Result<SnapshotSet, ResolveError> {
    let cutoff = build_time.as_datetime();
    let split = entries.partition_point(|s| s.time < cutoff);
    let (before, after) = entries.split_at(split);

    if before.is_empty() {
        return Err(ResolveError::NoSnapshotBefore(build_time));
    }
    let first_after = after
        .first()
        .ok_or(ResolveError::NoSnapshotAfter(build_time))?;

    let mut chosen: Vec<Snapshot> = before[before.len().saturating_sub(SNAPSHOTS_BEFORE)..].to_vec();
    chosen.push(first_after.clone());
    Ok(SnapshotSet::new(chosen)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> BuildTimestamp {
        BuildTimestamp::parse(s).unwrap()
    }

    fn ids(set: &SnapshotSet) -> Vec<&str> {
        set.snapshots().iter().map(|s| s.id.as_str()).collect()
    }

    fn listing(ids: &[&str]) -> String {
        let anchors: String = ids
            .iter()
            .map(|id| format!("<a href=\"{id}/\">{id}</a><br />\n"))
            .collect();
        format!("<html><body><p>{anchors}</p></body></html>")
    }

    #[test]
    fn test_months_single() {
        assert_eq!(months_spanning(ts("2017-01-15 12:00")), vec![(2017, 1)]);
    }

    #[test]
    fn test_months_crosses_year() {
        assert_eq!(
            months_spanning(ts("2017-01-01 03:00")),
            vec![(2016, 12), (2017, 1)]
        );
        assert_eq!(
            months_spanning(ts("2016-12-31 23:00")),
            vec![(2016, 12), (2017, 1)]
        );
    }

    #[test]
    fn test_parse_listing_sorted_and_deduped() {
        let html = listing(&["20170102T000000Z", "20170101T040541Z", "20170102T000000Z"]);
        let snaps = parse_listing(&html);
        let ids: Vec<_> = snaps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["20170101T040541Z", "20170102T000000Z"]);
    }

    #[test]
    fn test_parse_listing_ignores_other_links() {
        let html = r#"<a href="../">up</a><a href="?year=2017;month=2">next</a><a href="20170101T040541Z/">x</a>"#;
        assert_eq!(parse_listing(html).len(), 1);
    }

    #[test]
    fn test_select_two_before_one_after() {
        let entries = parse_listing(&listing(&[
            "20170110T000000Z",
            "20170110T060000Z",
            "20170110T120000Z",
            "20170110T180000Z",
            "20170111T000000Z",
        ]));
        let set = select_snapshots(&entries, ts("2017-01-10 13:00")).unwrap();
        assert_eq!(
            ids(&set),
            vec!["20170110T060000Z", "20170110T120000Z", "20170110T180000Z"]
        );
    }

    #[test]
    fn test_select_exact_match_counts_as_after() {
        let entries = parse_listing(&listing(&["20170110T000000Z", "20170110T120000Z"]));
        let set = select_snapshots(&entries, ts("2017-01-10 12:00")).unwrap();
        assert_eq!(ids(&set), vec!["20170110T000000Z", "20170110T120000Z"]);
    }

    #[test]
    fn test_select_requires_before() {
        let entries = parse_listing(&listing(&["20170110T120000Z"]));
        let err = select_snapshots(&entries, ts("2017-01-10 06:00")).unwrap_err();
        assert!(matches!(err, ResolveError::NoSnapshotBefore(_)));
        assert!(matches!(
            select_snapshots(&[], ts("2017-01-10 06:00")),
            Err(ResolveError::NoSnapshotBefore(_))
        ));
    }

    #[test]
    fn test_select_requires_after() {
        let entries = parse_listing(&listing(&["20170110T000000Z"]));
        let err = select_snapshots(&entries, ts("2017-01-10 06:00")).unwrap_err();
        assert!(matches!(err, ResolveError::NoSnapshotAfter(_)));
    }

    #[test]
    fn test_selection_brackets_build_time() {
        let entries = parse_listing(&listing(&[
            "20170105T000000Z",
            "20170108T000000Z",
            "20170109T000000Z",
            "20170112T000000Z",
            "20170115T000000Z",
        ]));
        for stamp in ["2017-01-08 12:00", "2017-01-09 00:00", "2017-01-14 23:59"] {
            let build_time = ts(stamp);
            let set = select_snapshots(&entries, build_time).unwrap();
            let times: Vec<_> = set.snapshots().iter().map(|s| s.time).collect();
            assert!(times.windows(2).all(|w| w[0] <= w[1]));
            assert!(times.iter().any(|t| *t <= build_time.as_datetime()));
            assert!(times.iter().any(|t| *t >= build_time.as_datetime()));
        }
    }

    #[test]
    fn test_listing_url() {
        let resolver = SnapshotResolver::new(
            Arc::new(crate::fakes::StaticPages::new()),
            "http://snapshot.debian.org/",
            "debian",
        );
        assert_eq!(
            resolver.listing_url(2017, 1),
            "http://snapshot.debian.org/archive/debian/?year=2017;month=01"
        );
    }
}
