//! Human-readable progress log at `.loopctl/progress.log`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use tracing::warn;

use crate::core::types::SignalKind;

#[derive(Debug, Clone)]
pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append `<rfc3339> [<kind>] [token=<token|->] <message>`.
    ///
    /// Failures are logged and otherwise ignored.
    pub fn append(&self, kind: SignalKind, token: Option<&str>, message: &str) {
        let line = format_line(kind, token, message);
        if let Err(err) = self.write(&line) {
            warn!(path = %self.path.display(), err = %err, "failed to append progress log");
        }
    }

    fn write(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

fn format_line(kind: SignalKind, token: Option<&str>, message: &str) -> String {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    // Keep one entry per line even if the worker's summary spans several.
    let message = message.replace(['\r', '\n'], " ");
    format!(
        "{timestamp} [{kind}] [token={}] {message}\n",
        token.unwrap_or("-")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_carry_kind_and_token() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = ProgressLog::new(temp.path().join("nested/progress.log"));
        log.append(SignalKind::Build, None, "run started");
        log.append(SignalKind::Build, Some("sess-1"), "task T1: next\nsecond line");

        let text = fs::read_to_string(temp.path().join("nested/progress.log")).expect("read");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[build] [token=-] run started"));
        assert!(lines[1].ends_with("[build] [token=sess-1] task T1: next second line"));
    }
}
