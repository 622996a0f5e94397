//! Result persistence.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use csv::Writer;
use serde::{Deserialize, Serialize};

use crate::domain::{BuildOutcome, Classification, ResultSet};

/// Column header of the results file.
pub const CSV_HEADER: [&str; 7] = [
    "package",
    "binary",
    "size",
    "wall_time",
    "cpu_user_time",
    "cpu_system_time",
    "outcome",
];

/// Destination for a finished batch.
pub trait ResultSink {
    fn write(&self, results: &ResultSet) -> Result<()>;
}

/// Writes one CSV row per outcome, in processing order.
#[derive(Debug, Clone)]
pub struct CsvResultSink {
    path: PathBuf,
}

impl CsvResultSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for CsvResultSink {
    fn write(&self, results: &ResultSet) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
        }
        let file =
            File::create(&self.path).with_context(|| format!("create {}", self.path.display()))?;
        write_csv(file, results).with_context(|| format!("write {}", self.path.display()))
    }
}

/// Serialise `results` as CSV into `out`.
pub fn write_csv<W: Write>(out: W, results: &ResultSet) -> Result<()> {
    let mut writer = Writer::from_writer(out);
    writer.write_record(CSV_HEADER)?;
    for outcome in results.iter() {
        writer.write_record(&row(outcome))?;
    }
    writer.flush()?;
    Ok(())
}

fn row(outcome: &BuildOutcome) -> [String; 7] {
    [
        outcome.package.clone(),
        outcome.artifact().unwrap_or_default().to_string(),
        outcome
            .expected_size()
            .map(|s| s.to_string())
            .unwrap_or_default(),
        format!("{:.3}", outcome.timing.wall_secs),
        format!("{:.3}", outcome.timing.user_secs),
        format!("{:.3}", outcome.timing.system_secs),
        outcome.classification.code().to_string(),
    ]
}

/// Per-classification totals of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub matched: usize,
    pub differed: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_results(results: &ResultSet) -> Self {
        Self {
            total: results.len(),
            matched: results.count(Classification::Match),
            differed: results.count(Classification::Differ),
            failed: results.count(Classification::Fail),
        }
    }
}

/// Human-readable report listing packages per classification.
pub fn render_summary(results: &ResultSet) -> String {
    let summary = BatchSummary::from_results(results);
    let mut out = format!(
        "{} package(s): {} match, {} differ, {} fail\n",
        summary.total, summary.matched, summary.differed, summary.failed
    );
    for (label, classification) in [
        ("Built packages with matching hash", Classification::Match),
        ("Built packages with differing hash", Classification::Differ),
        ("Failed", Classification::Fail),
    ] {
        let names: Vec<&str> = results
            .with_classification(classification)
            .map(|o| o.package.as_str())
            .collect();
        if !names.is_empty() {
            out.push_str(&format!("{label}: {}\n", names.join(", ")));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        BuildTimestamp, BuildTiming, Checksum, PackageTarget, Stage, StageFailure,
    };
    use std::sync::Arc;
    use tempfile::tempdir;

    fn target(name: &str) -> Arc<PackageTarget> {
        Arc::new(PackageTarget {
            name: name.to_string(),
            version: "4.4-1".to_string(),
            short_version: "4.4-1".to_string(),
            binary_name: name.to_string(),
            source_dir: name.to_string(),
            artifact: Some(format!("{name}_4.4-1_amd64.deb")),
            expected_hash: Some(Checksum::parse("abc123").unwrap()),
            expected_size: Some(1234),
            dependencies: vec![],
            build_time: BuildTimestamp::parse("2017-01-10 04:05").unwrap(),
        })
    }

    fn sample() -> ResultSet {
        let mut results = ResultSet::new();
        results.push(BuildOutcome::failed(
            "ghost",
            None,
            StageFailure::new(Stage::Fetch, "HTTP 404"),
            BuildTiming::ZERO,
        ));
        results.push(BuildOutcome::classified(
            target("sed"),
            Checksum::parse("abc123").ok(),
            BuildTiming::new(12.3456, 8.0, 1.25),
            Classification::Match,
        ));
        results.push(BuildOutcome::classified(
            target("grep"),
            Checksum::parse("def456").ok(),
            BuildTiming::new(1.0, 0.5, 0.1),
            Classification::Differ,
        ));
        results
    }

    #[test]
    fn test_csv_rows_in_processing_order() {
        let mut buf = Vec::new();
        write_csv(&mut buf, &sample()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "package,binary,size,wall_time,cpu_user_time,cpu_system_time,outcome",
                "ghost,,,0.000,0.000,0.000,f",
                "sed,sed_4.4-1_amd64.deb,1234,12.346,8.000,1.250,y",
                "grep,grep_4.4-1_amd64.deb,1234,1.000,0.500,0.100,n",
            ]
        );
    }

    #[test]
    fn test_csv_sink_writes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("reprotest.csv");
        let sink = CsvResultSink::new(&path);
        sink.write(&sample()).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(reader.headers().unwrap().len(), 7);
        assert_eq!(reader.records().count(), 3);
    }

    #[test]
    fn test_empty_results_write_header_only() {
        let mut buf = Vec::new();
        write_csv(&mut buf, &ResultSet::new()).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap().trim_end(),
            CSV_HEADER.join(",")
        );
    }

    #[test]
    fn test_summary() {
        let results = sample();
        assert_eq!(
            BatchSummary::from_results(&results),
            BatchSummary {
                total: 3,
                matched: 1,
                differed: 1,
                failed: 1
            }
        );
        let text = render_summary(&results);
        assert!(text.starts_with("3 package(s): 1 match, 1 differ, 1 fail"));
        assert!(text.contains("Failed: ghost"));
    }
}
