//! Run archiving to `.loopctl/history/` and `.loopctl/metrics/runs.jsonl`.
//!
//! Archiving is best-effort: failures are logged and reported in the returned
//! [`ArchiveOutcome`] but never become errors for the driver.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::core::record::RunRecord;
use crate::io::paths::ControllerPaths;

/// Gives up on finding a free history file name after this many suffixes.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// What the archiver managed to write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveOutcome {
    pub history_path: Option<PathBuf>,
    pub metrics_appended: bool,
}

#[derive(Debug, Clone)]
pub struct RunArchiver {
    history_dir: PathBuf,
    metrics_path: PathBuf,
}

impl RunArchiver {
    pub fn new(paths: &ControllerPaths) -> Self {
        Self {
            history_dir: paths.history_dir.clone(),
            metrics_path: paths.metrics_path.clone(),
        }
    }

    /// Write the history file and append one metrics line.
    pub fn archive(&self, record: &RunRecord) -> ArchiveOutcome {
        let history_path = match self.write_history(record) {
            Ok(path) => {
                info!(path = %path.display(), trace_id = %record.trace_id, "run record archived");
                Some(path)
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), trace_id = %record.trace_id, "failed to write run history");
                None
            }
        };
        let metrics_appended = match self.append_metrics(record) {
            Ok(()) => true,
            Err(err) => {
                warn!(err = %format!("{err:#}"), trace_id = %record.trace_id, "failed to append metrics line");
                false
            }
        };
        ArchiveOutcome {
            history_path,
            metrics_appended,
        }
    }

    fn write_history(&self, record: &RunRecord) -> Result<PathBuf> {
        fs::create_dir_all(&self.history_dir)
            .with_context(|| format!("create {}", self.history_dir.display()))?;
        let body = render_pretty(record)?;
        let stem = format!(
            "{}-{}",
            record.span_kind,
            record.timestamp.format("%Y%m%dT%H%M%S%.3fZ")
        );

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{stem}.json")
            } else {
                format!("{stem}-{attempt}.json")
            };
            let path = self.history_dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    fill_new_file(file, &path, body.as_bytes())?;
                    return Ok(path);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), "history name taken");
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("create {}", path.display()));
                }
            }
        }
        bail!("no free history file name for {stem}")
    }

    fn append_metrics(&self, record: &RunRecord) -> Result<()> {
        if let Some(parent) = self.metrics_path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(record).context("serialize run record")?;
        line.push('\n');
        append_line(&self.metrics_path, &line)
    }
}

/// Pretty JSON, falling back to the compact form.
fn render_pretty(record: &RunRecord) -> Result<String> {
    match serde_json::to_string_pretty(record) {
        Ok(mut text) => {
            text.push('\n');
            Ok(text)
        }
        Err(err) => {
            warn!(err = %err, "pretty-printing run record failed, writing compact form");
            serde_json::to_string(record).context("serialize run record")
        }
    }
}

/// Write `body` into the just-created `file` at `path`. On failure the file
/// is removed so no empty or partial record is left in the history.
fn fill_new_file(mut file: impl Write, path: &Path, body: &[u8]) -> Result<()> {
    let written = file.write_all(body).and_then(|()| file.flush());
    drop(file);
    if let Err(err) = written {
        if let Err(remove_err) = fs::remove_file(path) {
            warn!(path = %path.display(), err = %remove_err, "failed to remove partial history file");
        }
        return Err(err).with_context(|| format!("write {}", path.display()));
    }
    Ok(())
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    // One write call per line keeps concurrent appends from interleaving.
    file.write_all(line.as_bytes())
        .with_context(|| format!("append {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{RunStatus, SignalKind};
    use chrono::{TimeZone, Utc};

    fn record() -> RunRecord {
        let started = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let mut record = RunRecord::new(
            SignalKind::Build,
            "trace-1",
            "plan.md",
            RunStatus::Failed,
            started,
            started + chrono::Duration::milliseconds(250),
        );
        record.completed = vec!["T1".to_string()];
        record
    }

    #[test]
    fn archive_writes_history_and_metrics() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ControllerPaths::new(temp.path());
        let outcome = RunArchiver::new(&paths).archive(&record());

        let history = outcome.history_path.expect("history written");
        assert_eq!(
            history.file_name().and_then(|n| n.to_str()),
            Some("build-20260304T050607.250Z.json")
        );
        let text = fs::read_to_string(&history).expect("read history");
        assert!(text.contains("\n  \"trace_id\": \"trace-1\""));

        let metrics = fs::read_to_string(&paths.metrics_path).expect("read metrics");
        let lines: Vec<&str> = metrics.lines().collect();
        assert_eq!(lines.len(), 1);
        let parsed: RunRecord = serde_json::from_str(lines[0]).expect("parse line");
        assert_eq!(parsed, record());
    }

    #[test]
    fn archiving_twice_appends_two_lines_and_two_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ControllerPaths::new(temp.path());
        let archiver = RunArchiver::new(&paths);

        let first = archiver.archive(&record());
        let second = archiver.archive(&record());

        assert_ne!(first.history_path, second.history_path);
        let metrics = fs::read_to_string(&paths.metrics_path).expect("read metrics");
        assert_eq!(metrics.lines().count(), 2);
        for line in metrics.lines() {
            serde_json::from_str::<RunRecord>(line).expect("each line is a record");
        }
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("no space left on device"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_history_write_leaves_no_file_behind() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("build-20260304T050607.250Z.json");
        fs::write(&path, "").expect("create");

        let err = fill_new_file(FullDisk, &path, b"{}").unwrap_err();

        assert!(format!("{err:#}").contains("no space left"));
        assert!(!path.exists());
    }

    #[test]
    fn unwritable_history_still_appends_metrics() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ControllerPaths::new(temp.path());
        fs::create_dir_all(&paths.state_dir).expect("mkdir");
        // A file where the history directory should be.
        fs::write(&paths.history_dir, "").expect("write blocker");

        let outcome = RunArchiver::new(&paths).archive(&record());
        assert_eq!(outcome.history_path, None);
        assert!(outcome.metrics_appended);
    }
}
