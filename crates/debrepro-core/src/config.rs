//! Run configuration.
//!
//! Layering, lowest to highest precedence: built-in defaults, an optional
//! JSON file, `DEBREPRO_*` environment variables, command-line flags (applied
//! by the CLI on top of the returned value).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Everything a verification run needs to know about its surroundings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReproConfig {
    /// Reference builder site.
    pub reference_base: String,
    /// Suite on the reference site (`testing`, `unstable`, ...).
    pub suite: String,
    pub arch: String,

    /// Snapshot archive site.
    pub snapshot_base: String,
    /// Archive name on the snapshot site.
    pub archive: String,
    /// Distribution name written into `sources.list`.
    pub dist: String,

    /// Pinned base image for rebuild containers.
    pub base_image: String,
    /// Packages installed before the recorded build dependencies.
    pub toolchain: Vec<String>,
    /// Container runtime binary.
    pub runtime_binary: String,
    /// Host cgroup mount point.
    pub cgroup_root: PathBuf,

    pub http_timeout_secs: u64,
    /// Ceiling for provisioning commands.
    pub command_timeout_secs: u64,
    /// Ceiling for each build command.
    pub build_timeout_secs: u64,
    /// Ceiling for runtime bookkeeping (`run` incl. image pull, `cp`, `rm`, `inspect`).
    pub control_timeout_secs: u64,

    /// Root for results, transcripts and copied artifacts.
    pub output_dir: PathBuf,
    pub csv_file: String,

    /// How many packages `random-fresh` draws.
    pub fresh_sample_size: usize,
}

impl Default for ReproConfig {
    fn default() -> Self {
        ReproConfig {
            reference_base: "https://tests.reproducible-builds.org".to_string(),
            suite: "testing".to_string(),
            arch: "amd64".to_string(),
            snapshot_base: "http://snapshot.debian.org".to_string(),
            archive: "debian".to_string(),
            dist: "stretch".to_string(),
            base_image: "debian:stretch".to_string(),
            toolchain: vec!["dpkg-dev".to_string(), "fakeroot".to_string()],
            runtime_binary: "docker".to_string(),
            cgroup_root: PathBuf::from("/sys/fs/cgroup"),
            http_timeout_secs: 60,
            command_timeout_secs: 1800,
            build_timeout_secs: 4 * 3600,
            control_timeout_secs: 600,
            output_dir: PathBuf::from("."),
            csv_file: "reprotest.csv".to_string(),
            fresh_sample_size: 3,
        }
    }
}

impl ReproConfig {
    /// Defaults, overlaid with `path` when given, overlaid with the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_env_from(|key| std::env::var(key).ok())
    }

    /// Read a JSON file; absent keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// Apply `DEBREPRO_*` overrides resolved through `lookup`.
    pub fn with_env_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |key: &str, slot: &mut String| {
            if let Some(v) = lookup(key) {
                *slot = v;
            }
        };
        string("DEBREPRO_REFERENCE_BASE", &mut self.reference_base);
        string("DEBREPRO_SUITE", &mut self.suite);
        string("DEBREPRO_ARCH", &mut self.arch);
        string("DEBREPRO_SNAPSHOT_BASE", &mut self.snapshot_base);
        string("DEBREPRO_ARCHIVE", &mut self.archive);
        string("DEBREPRO_DIST", &mut self.dist);
        string("DEBREPRO_BASE_IMAGE", &mut self.base_image);
        string("DEBREPRO_RUNTIME", &mut self.runtime_binary);
        string("DEBREPRO_CSV_FILE", &mut self.csv_file);

        if let Some(v) = lookup("DEBREPRO_CGROUP_ROOT") {
            self.cgroup_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("DEBREPRO_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DEBREPRO_TOOLCHAIN") {
            self.toolchain = v.split_whitespace().map(str::to_string).collect();
        }

        let number = |key: &str| -> Result<Option<u64>> {
            lookup(key)
                .map(|v| {
                    v.trim()
                        .parse::<u64>()
                        .with_context(|| format!("{key} must be a non-negative integer, got {v:?}"))
                })
                .transpose()
        };
        if let Some(v) = number("DEBREPRO_HTTP_TIMEOUT")? {
            self.http_timeout_secs = v;
        }
        if let Some(v) = number("DEBREPRO_COMMAND_TIMEOUT")? {
            self.command_timeout_secs = v;
        }
        if let Some(v) = number("DEBREPRO_BUILD_TIMEOUT")? {
            self.build_timeout_secs = v;
        }
        if let Some(v) = number("DEBREPRO_CONTROL_TIMEOUT")? {
            self.control_timeout_secs = v;
        }
        if let Some(v) = number("DEBREPRO_FRESH_SAMPLE_SIZE")? {
            self.fresh_sample_size = v as usize;
        }
        Ok(self)
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("reference_base", &self.reference_base),
            ("snapshot_base", &self.snapshot_base),
        ] {
            if !(value.starts_with("http://") || value.starts_with("https://")) {
                bail!("{name} must be an http(s) URL, got {value:?}");
            }
        }
        for (name, value) in [
            ("suite", &self.suite),
            ("arch", &self.arch),
            ("archive", &self.archive),
            ("dist", &self.dist),
            ("base_image", &self.base_image),
            ("runtime_binary", &self.runtime_binary),
            ("csv_file", &self.csv_file),
        ] {
            if value.trim().is_empty() {
                bail!("{name} must not be empty");
            }
        }
        for (name, value) in [
            ("http_timeout_secs", self.http_timeout_secs),
            ("command_timeout_secs", self.command_timeout_secs),
            ("build_timeout_secs", self.build_timeout_secs),
            ("control_timeout_secs", self.control_timeout_secs),
        ] {
            if value == 0 {
                bail!("{name} must be greater than zero");
            }
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn csv_path(&self) -> PathBuf {
        self.output_dir.join(&self.csv_file)
    }

    /// Directory holding per-package transcripts.
    pub fn log_dir(&self) -> PathBuf {
        self.output_dir.join("logs")
    }

    /// Directory rebuilt artifacts are copied into.
    pub fn artifact_dir(&self) -> PathBuf {
        self.output_dir.join("artifacts")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ReproConfig::default();
        config.validate().unwrap();
        assert_eq!(config.csv_path(), PathBuf::from("./reprotest.csv"));
        assert_eq!(config.log_dir(), PathBuf::from("./logs"));
        assert_eq!(config.toolchain, vec!["dpkg-dev", "fakeroot"]);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("debrepro.json");
        std::fs::write(&path, r#"{"suite": "unstable", "fresh_sample_size": 5}"#).unwrap();

        let config = ReproConfig::from_file(&path).unwrap();
        assert_eq!(config.suite, "unstable");
        assert_eq!(config.fresh_sample_size, 5);
        assert_eq!(config.arch, "amd64");
    }

    #[test]
    fn test_bad_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = ReproConfig::from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parse config"));
        assert!(ReproConfig::from_file(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = ReproConfig::default()
            .with_env_from(env(&[
                ("DEBREPRO_SUITE", "unstable"),
                ("DEBREPRO_BUILD_TIMEOUT", "60"),
                ("DEBREPRO_OUTPUT_DIR", "/tmp/out"),
                ("DEBREPRO_TOOLCHAIN", "dpkg-dev fakeroot build-essential"),
            ]))
            .unwrap();
        assert_eq!(config.suite, "unstable");
        assert_eq!(config.build_timeout_secs, 60);
        assert_eq!(config.csv_path(), PathBuf::from("/tmp/out/reprotest.csv"));
        assert_eq!(config.toolchain.len(), 3);
    }

    #[test]
    fn test_env_rejects_bad_number() {
        let err = ReproConfig::default()
            .with_env_from(env(&[("DEBREPRO_HTTP_TIMEOUT", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("DEBREPRO_HTTP_TIMEOUT"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ReproConfig {
            reference_base: "ftp://example.org".to_string(),
            ..ReproConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ReproConfig {
            base_image: " ".to_string(),
            ..ReproConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ReproConfig {
            http_timeout_secs: 0,
            ..ReproConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_step_timeouts() {
        for config in [
            ReproConfig {
                command_timeout_secs: 0,
                ..ReproConfig::default()
            },
            ReproConfig {
                build_timeout_secs: 0,
                ..ReproConfig::default()
            },
            ReproConfig {
                control_timeout_secs: 0,
                ..ReproConfig::default()
            },
        ] {
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("must be greater than zero"));
        }
    }

    #[test]
    fn test_env_sets_control_timeout() {
        let config = ReproConfig::default()
            .with_env_from(env(&[("DEBREPRO_CONTROL_TIMEOUT", "1200")]))
            .unwrap();
        assert_eq!(config.control_timeout_secs, 1200);
        assert_eq!(ReproConfig::default().control_timeout_secs, 600);
    }
}
