//! Per-package build transcripts.
//!
//! Every command issued into a package's container is appended to its
//! transcript together with the exit code and captured output. The pipeline
//! writes the transcript to `{log_dir}/{package}.log` when the package ends.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use container_env::ExecOutput;

#[derive(Debug, Clone)]
struct Entry {
    step: String,
    command: String,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    duration_ms: u64,
}

/// Ordered command log of one package.
#[derive(Debug, Clone)]
pub struct Transcript {
    package: String,
    started_at: DateTime<Utc>,
    notes: Vec<String>,
    entries: Vec<Entry>,
}

impl Transcript {
    pub fn new(package: &str) -> Self {
        Self {
            package: package.to_string(),
            started_at: Utc::now(),
            notes: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Number of commands recorded.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Free-form line (container name, failure summary, ...).
    pub fn note(&mut self, line: impl Into<String>) {
        self.notes.push(line.into());
    }

    /// A command that ran to completion.
    pub fn record(&mut self, step: &str, command: &str, output: &ExecOutput) {
        self.entries.push(Entry {
            step: step.to_string(),
            command: command.to_string(),
            exit_code: Some(output.exit_code),
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
            duration_ms: output.duration_ms,
        });
    }

    /// A command the runtime could not run (timeout, spawn failure, ...).
    pub fn record_error(&mut self, step: &str, command: &str, error: &dyn std::fmt::Display) {
        self.entries.push(Entry {
            step: step.to_string(),
            command: command.to_string(),
            exit_code: None,
            stdout: String::new(),
            stderr: error.to_string(),
            duration_ms: 0,
        });
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "# {} ({})",
            self.package,
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        for note in &self.notes {
            let _ = writeln!(out, "# {note}");
        }
        for entry in &self.entries {
            let status = match entry.exit_code {
                Some(code) => format!("exit {code}"),
                None => "not run".to_string(),
            };
            let _ = writeln!(
                out,
                "\n== [{}] $ {} ({status}, {} ms)",
                entry.step, entry.command, entry.duration_ms
            );
            if !entry.stdout.is_empty() {
                let _ = writeln!(out, "-- stdout\n{}", entry.stdout.trim_end());
            }
            if !entry.stderr.is_empty() {
                let _ = writeln!(out, "-- stderr\n{}", entry.stderr.trim_end());
            }
        }
        out
    }

    /// Write to `{dir}/{package}.log`, creating `dir` as needed.
    pub fn write_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.log", sanitize(&self.package)));
        std::fs::write(&path, self.render())?;
        Ok(path)
    }
}

/// Keep package names usable as file and container names.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn output(code: i32) -> ExecOutput {
        ExecOutput {
            exit_code: code,
            stdout: "Reading package lists...\n".to_string(),
            stderr: if code == 0 { String::new() } else { "E: boom\n".to_string() },
            duration_ms: 42,
        }
    }

    #[test]
    fn test_render_lists_commands_in_order() {
        let mut t = Transcript::new("sed");
        t.note("container debrepro-sed-1234abcd");
        t.record("update_index", "apt-get update", &output(0));
        t.record("build_package", "dpkg-buildpackage -us -uc -tc", &output(2));
        t.record_error("fetch_source", "apt-get source sed=4.4-1", &"timed out");

        let text = t.render();
        assert_eq!(t.len(), 3);
        assert!(text.starts_with("# sed ("));
        assert!(text.contains("# container debrepro-sed-1234abcd"));
        let update = text.find("$ apt-get update (exit 0, 42 ms)").unwrap();
        let build = text.find("$ dpkg-buildpackage -us -uc -tc (exit 2, 42 ms)").unwrap();
        assert!(update < build);
        assert!(text.contains("E: boom"));
        assert!(text.contains("(not run, 0 ms)"));
    }

    #[test]
    fn test_write_to_creates_log_file() {
        let dir = tempdir().unwrap();
        let mut t = Transcript::new("attr");
        t.record("update_index", "apt-get update", &output(0));
        let path = t.write_to(&dir.path().join("logs")).unwrap();
        assert_eq!(path, dir.path().join("logs").join("attr.log"));
        assert!(std::fs::read_to_string(path).unwrap().contains("apt-get update"));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("libstdc++6"), "libstdc__6");
        assert_eq!(sanitize("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize("geronimo-ejb-3.2-spec"), "geronimo-ejb-3.2-spec");
    }
}
