//! CPU accounting for rebuilds.
//!
//! Per-container cgroup counters are preferred. When the host does not expose
//! them (no cgroup hierarchy, non-Linux host, rootless runtime) accounting
//! falls back to host-wide `/proc/stat` deltas and finally to the resource
//! usage of this process's children. The strategy is detected once, when
//! the container is provisioned, and callers only ever see [`CpuSample`]s.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Kernel clock ticks per second used by `cpuacct.stat` and `/proc/stat`.
const USER_HZ: f64 = 100.0;

const PROC_STAT: &str = "/proc/stat";

/// Cumulative CPU time at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuSample {
    pub user_secs: f64,
    pub system_secs: f64,
}

impl CpuSample {
    /// CPU time consumed since `earlier`, clamped at zero.
    pub fn delta_since(&self, earlier: &CpuSample) -> CpuSample {
        CpuSample {
            user_secs: (self.user_secs - earlier.user_secs).max(0.0),
            system_secs: (self.system_secs - earlier.system_secs).max(0.0),
        }
    }
}

/// Layout of a per-container cgroup counter file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupFormat {
    /// cgroup v1 `cpuacct.stat`: `user <ticks>` / `system <ticks>`
    V1Ticks,
    /// cgroup v2 `cpu.stat`: `user_usec <n>` / `system_usec <n>`
    V2Usec,
}

/// Where CPU time is read from.
#[derive(Debug, Clone, PartialEq)]
pub enum CpuAccounting {
    /// Per-container counters exposed by the runtime's cgroup.
    Cgroup {
        stat_path: PathBuf,
        format: CgroupFormat,
    },
    /// Host-wide counters.
    HostStat { stat_path: PathBuf },
    /// `getrusage(RUSAGE_CHILDREN)` of this process.
    ChildProcesses,
}

impl CpuAccounting {
    /// Pick the best available source for `container_id`.
    pub fn detect(cgroup_root: &Path, container_id: &str) -> Self {
        Self::detect_with(cgroup_root, container_id, Path::new(PROC_STAT))
    }

    /// [`detect`](Self::detect) with an explicit host stat file.
    pub fn detect_with(cgroup_root: &Path, container_id: &str, proc_stat: &Path) -> Self {
        if !container_id.is_empty() {
            for (stat_path, format) in cgroup_candidates(cgroup_root, container_id) {
                let readable = std::fs::read_to_string(&stat_path)
                    .ok()
                    .and_then(|text| parse_cgroup(&text, format))
                    .is_some();
                if readable {
                    debug!(path = %stat_path.display(), "Using per-container cgroup accounting");
                    return CpuAccounting::Cgroup { stat_path, format };
                }
            }
        }

        let host_readable = std::fs::read_to_string(proc_stat)
            .ok()
            .and_then(|text| parse_proc_stat(&text))
            .is_some();
        if host_readable {
            debug!("Per-container counters unavailable, using host /proc/stat");
            CpuAccounting::HostStat {
                stat_path: proc_stat.to_path_buf(),
            }
        } else {
            debug!("Per-container and host counters unavailable, using child rusage");
            CpuAccounting::ChildProcesses
        }
    }

    /// Short label of the active source (diagnostics only).
    pub fn source_name(&self) -> &'static str {
        match self {
            CpuAccounting::Cgroup { .. } => "cgroup",
            CpuAccounting::HostStat { .. } => "host",
            CpuAccounting::ChildProcesses => "rusage",
        }
    }

    /// Read the current counters. Unreadable counters yield a zero sample.
    pub fn sample(&self) -> CpuSample {
        match self.try_sample() {
            Ok(sample) => sample,
            Err(e) => {
                warn!(source = self.source_name(), error = %e, "Failed to read CPU counters");
                CpuSample::default()
            }
        }
    }

    fn try_sample(&self) -> std::io::Result<CpuSample> {
        match self {
            CpuAccounting::Cgroup { stat_path, format } => {
                let text = std::fs::read_to_string(stat_path)?;
                parse_cgroup(&text, *format).ok_or_else(|| malformed(stat_path))
            }
            CpuAccounting::HostStat { stat_path } => {
                let text = std::fs::read_to_string(stat_path)?;
                parse_proc_stat(&text).ok_or_else(|| malformed(stat_path))
            }
            CpuAccounting::ChildProcesses => child_rusage(),
        }
    }
}

fn malformed(path: &Path) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("unrecognised counter format in {}", path.display()),
    )
}

/// Candidate counter files, systemd and cgroupfs drivers, v2 first.
fn cgroup_candidates(root: &Path, id: &str) -> Vec<(PathBuf, CgroupFormat)> {
    vec![
        (
            root.join("system.slice")
                .join(format!("docker-{id}.scope"))
                .join("cpu.stat"),
            CgroupFormat::V2Usec,
        ),
        (
            root.join("docker").join(id).join("cpu.stat"),
            CgroupFormat::V2Usec,
        ),
        (
            root.join("cpuacct").join("docker").join(id).join("cpuacct.stat"),
            CgroupFormat::V1Ticks,
        ),
        (
            root.join("cpu,cpuacct")
                .join("docker")
                .join(id)
                .join("cpuacct.stat"),
            CgroupFormat::V1Ticks,
        ),
    ]
}

fn parse_cgroup(text: &str, format: CgroupFormat) -> Option<CpuSample> {
    let (user_key, system_key, scale) = match format {
        CgroupFormat::V1Ticks => ("user", "system", USER_HZ),
        CgroupFormat::V2Usec => ("user_usec", "system_usec", 1_000_000.0),
    };

    let mut user = None;
    let mut system = None;
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(value) = value.parse::<u64>() else {
            continue;
        };
        if key == user_key {
            user = Some(value as f64 / scale);
        } else if key == system_key {
            system = Some(value as f64 / scale);
        }
    }

    Some(CpuSample {
        user_secs: user?,
        system_secs: system?,
    })
}

/// Aggregate `cpu` line: `cpu user nice system idle ...` in ticks.
fn parse_proc_stat(text: &str) -> Option<CpuSample> {
    let line = text.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|f| f.parse().ok())
        .collect::<Option<Vec<_>>>()?;
    if fields.len() < 3 {
        return None;
    }
    Some(CpuSample {
        user_secs: fields[0] as f64 / USER_HZ,
        system_secs: fields[2] as f64 / USER_HZ,
    })
}

#[cfg(unix)]
fn child_rusage() -> std::io::Result<CpuSample> {
    use nix::sys::resource::{getrusage, UsageWho};

    let usage = getrusage(UsageWho::RUSAGE_CHILDREN).map_err(std::io::Error::from)?;
    let (user, system) = (usage.user_time(), usage.system_time());
    Ok(CpuSample {
        user_secs: user.tv_sec() as f64 + user.tv_usec() as f64 / 1_000_000.0,
        system_secs: system.tv_sec() as f64 + system.tv_usec() as f64 / 1_000_000.0,
    })
}

#[cfg(not(unix))]
fn child_rusage() -> std::io::Result<CpuSample> {
    Ok(CpuSample::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const ID: &str = "3f1c0d9e8b7a";

    #[test]
    fn test_delta_clamps_at_zero() {
        let before = CpuSample {
            user_secs: 10.0,
            system_secs: 5.0,
        };
        let after = CpuSample {
            user_secs: 12.5,
            system_secs: 4.0,
        };
        let delta = after.delta_since(&before);
        assert_eq!(delta.user_secs, 2.5);
        assert_eq!(delta.system_secs, 0.0);
    }

    #[test]
    fn test_parse_cgroup_v2() {
        let text = "usage_usec 5000000\nuser_usec 3000000\nsystem_usec 1500000\nnr_periods 0\n";
        let sample = parse_cgroup(text, CgroupFormat::V2Usec).unwrap();
        assert_eq!(sample.user_secs, 3.0);
        assert_eq!(sample.system_secs, 1.5);
    }

    #[test]
    fn test_parse_cgroup_v1() {
        let sample = parse_cgroup("user 250\nsystem 50\n", CgroupFormat::V1Ticks).unwrap();
        assert_eq!(sample.user_secs, 2.5);
        assert_eq!(sample.system_secs, 0.5);
    }

    #[test]
    fn test_parse_cgroup_missing_field() {
        assert!(parse_cgroup("user 250\n", CgroupFormat::V1Ticks).is_none());
    }

    #[test]
    fn test_parse_proc_stat() {
        let text = "cpu  4705 150 1120 16250 520 0 20 0 0 0\ncpu0 2000 75 560 8000 260 0 10 0 0 0\nintr 1\n";
        let sample = parse_proc_stat(text).unwrap();
        assert_eq!(sample.user_secs, 47.05);
        assert_eq!(sample.system_secs, 11.2);
    }

    #[test]
    fn test_detect_prefers_cgroup_v2() {
        let root = tempdir().unwrap();
        let scope = root
            .path()
            .join("system.slice")
            .join(format!("docker-{ID}.scope"));
        std::fs::create_dir_all(&scope).unwrap();
        std::fs::write(scope.join("cpu.stat"), "user_usec 10\nsystem_usec 20\n").unwrap();

        let accounting = CpuAccounting::detect_with(root.path(), ID, Path::new("/nonexistent"));
        assert_eq!(accounting.source_name(), "cgroup");
        assert!(matches!(
            accounting,
            CpuAccounting::Cgroup {
                format: CgroupFormat::V2Usec,
                ..
            }
        ));
    }

    #[test]
    fn test_detect_cgroup_v1() {
        let root = tempdir().unwrap();
        let dir = root.path().join("cpuacct").join("docker").join(ID);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("cpuacct.stat"), "user 100\nsystem 100\n").unwrap();

        let accounting = CpuAccounting::detect_with(root.path(), ID, Path::new("/nonexistent"));
        assert!(matches!(
            accounting,
            CpuAccounting::Cgroup {
                format: CgroupFormat::V1Ticks,
                ..
            }
        ));
        let sample = accounting.sample();
        assert_eq!(sample.user_secs, 1.0);
        assert_eq!(sample.system_secs, 1.0);
    }

    #[test]
    fn test_detect_falls_back_to_host_stat() {
        let root = tempdir().unwrap();
        let stat = root.path().join("stat");
        std::fs::write(&stat, "cpu  100 0 50 1000 0 0 0 0 0 0\n").unwrap();

        let accounting = CpuAccounting::detect_with(&root.path().join("cgroup"), ID, &stat);
        assert_eq!(
            accounting,
            CpuAccounting::HostStat {
                stat_path: stat.clone()
            }
        );
        assert_eq!(accounting.sample().system_secs, 0.5);
    }

    #[test]
    fn test_detect_falls_back_to_child_processes() {
        let root = tempdir().unwrap();
        let accounting =
            CpuAccounting::detect_with(root.path(), ID, &root.path().join("missing-stat"));
        assert_eq!(accounting, CpuAccounting::ChildProcesses);
        let sample = accounting.sample();
        assert!(sample.user_secs >= 0.0);
        assert!(sample.system_secs >= 0.0);
    }

    #[test]
    fn test_empty_container_id_skips_cgroup() {
        let root = tempdir().unwrap();
        let accounting =
            CpuAccounting::detect_with(root.path(), "", &root.path().join("missing-stat"));
        assert_eq!(accounting, CpuAccounting::ChildProcesses);
    }

    #[test]
    fn test_vanished_counter_samples_zero() {
        let accounting = CpuAccounting::Cgroup {
            stat_path: PathBuf::from("/nonexistent/cpu.stat"),
            format: CgroupFormat::V2Usec,
        };
        assert_eq!(accounting.sample(), CpuSample::default());
    }
}
