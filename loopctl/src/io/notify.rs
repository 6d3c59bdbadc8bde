//! Outbound alerts on critical terminations.
//!
//! Notifications are advisory. Nothing here returns an error: an unset
//! endpoint, a missing `curl`, a failed post or a timeout are logged at debug
//! and dropped.

use std::fmt;
use std::process::Command;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info};

use crate::io::process::run_command_with_timeout;

/// Environment variable holding the webhook endpoint.
pub const WEBHOOK_ENV: &str = "LOOPCTL_WEBHOOK_URL";

const RESPONSE_LIMIT_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    /// Fatal or halting termination; the only level that is sent.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Fatal => "fatal",
        })
    }
}

pub trait Notifier {
    fn notify_critical(&self, message: &str, severity: Severity);
}

/// Posts `{"text", "severity"}` to a webhook with `curl`.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    endpoint: Option<String>,
    timeout: Duration,
    program: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: Option<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty()),
            timeout,
            program: "curl".to_string(),
        }
    }

    /// Endpoint from `LOOPCTL_WEBHOOK_URL`.
    pub fn from_env(timeout: Duration) -> Self {
        Self::new(std::env::var(WEBHOOK_ENV).ok(), timeout)
    }

    /// Replace the transport program; it receives curl's arguments.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    fn post(&self, endpoint: &str, message: &str, severity: Severity) {
        let body = json!({ "text": message, "severity": severity.to_string() }).to_string();
        let mut cmd = Command::new(&self.program);
        cmd.args([
            "-sS",
            "-X",
            "POST",
            "-H",
            "Content-Type: application/json",
            "--data-binary",
            "@-",
        ])
        .arg(endpoint);

        let sent = run_command_with_timeout(
            cmd,
            Some(body.as_bytes()),
            self.timeout,
            RESPONSE_LIMIT_BYTES,
        );
        match sent {
            Ok(output) if output.timed_out => debug!("notification timed out"),
            Ok(output) if !output.status.success() => {
                debug!(exit_code = ?output.status.code(), "notification post failed");
            }
            Ok(_) => info!(severity = %severity, "notification sent"),
            Err(err) => debug!(err = %format!("{err:#}"), "notification transport unavailable"),
        }
    }
}

impl Notifier for WebhookNotifier {
    fn notify_critical(&self, message: &str, severity: Severity) {
        if severity != Severity::Fatal {
            debug!(severity = %severity, "notification skipped, severity below fatal");
            return;
        }
        let Some(endpoint) = &self.endpoint else {
            debug!("notification skipped, no endpoint configured");
            return;
        };
        self.post(endpoint, message, severity);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// Fake curl that records its stdin and last argument.
    fn fake_curl(dir: &Path, exit_code: i32) -> String {
        let script = dir.join("curl");
        let capture = dir.join("capture");
        fs::write(
            &script,
            format!(
                "#!/bin/sh\ncat > '{}'\nfor last; do :; done\necho \"$last\" >> '{}'\nexit {exit_code}\n",
                capture.display(),
                capture.display()
            ),
        )
        .expect("write script");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");
        script.display().to_string()
    }

    #[test]
    fn fatal_with_endpoint_posts_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let notifier = WebhookNotifier::new(
            Some("https://hooks.invalid/x".to_string()),
            Duration::from_secs(5),
        )
        .with_program(fake_curl(temp.path(), 0));

        notifier.notify_critical("build blocked", Severity::Fatal);

        let captured = fs::read_to_string(temp.path().join("capture")).expect("captured");
        assert!(captured.contains(r#""text":"build blocked""#));
        assert!(captured.contains(r#""severity":"fatal""#));
        assert!(captured.trim_end().ends_with("https://hooks.invalid/x"));
    }

    #[test]
    fn non_fatal_severity_is_not_sent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let notifier = WebhookNotifier::new(
            Some("https://hooks.invalid/x".to_string()),
            Duration::from_secs(5),
        )
        .with_program(fake_curl(temp.path(), 0));

        notifier.notify_critical("fyi", Severity::Warning);
        assert!(!temp.path().join("capture").exists());
    }

    #[test]
    fn unset_endpoint_is_a_no_op() {
        let notifier = WebhookNotifier::new(Some("  ".to_string()), Duration::from_secs(1));
        assert!(!notifier.is_configured());
        notifier.notify_critical("ignored", Severity::Fatal);
    }

    #[test]
    fn transport_failures_are_swallowed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let endpoint = Some("https://hooks.invalid/x".to_string());
        let failing = WebhookNotifier::new(endpoint.clone(), Duration::from_secs(5))
            .with_program(fake_curl(temp.path(), 7));
        failing.notify_critical("boom", Severity::Fatal);

        let missing = WebhookNotifier::new(endpoint, Duration::from_secs(5))
            .with_program(temp.path().join("no-such-curl").display().to_string());
        missing.notify_critical("boom", Severity::Fatal);
    }
}
