//! Per-run session shared by both drivers: invoke, validate, thread the
//! continuation token, then archive and report once at the end.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::record::{RunError, RunRecord};
use crate::core::signal::parse_envelope;
use crate::core::types::{ContractSignal, RunStatus, SignalKind};
use crate::driver::{RunOutcome, Services};
use crate::exit_codes;
use crate::io::contract::Contract;
use crate::io::notify::{Notifier, Severity};
use crate::io::progress::ProgressLog;
use crate::io::worker::{Worker, WorkerRequest};

pub const WORKER_INVOCATION_FAILURE: &str = "worker_invocation_failure";
pub const PROMPT_RENDER_FAILURE: &str = "prompt_render_failure";

/// How a run ended, as decided by the driver's state machine.
#[derive(Debug, Clone)]
pub struct Conclusion {
    pub status: RunStatus,
    /// Human-readable reason for progress lines and notifications.
    pub reason: String,
    pub completed: Vec<String>,
    pub blockers: Vec<String>,
    pub error: Option<RunError>,
    pub summary: Option<String>,
}

impl Conclusion {
    pub fn new(status: RunStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            completed: Vec::new(),
            blockers: Vec::new(),
            error: None,
            summary: None,
        }
    }
}

pub struct Session<'a, W, N, S> {
    services: &'a Services<W, N>,
    kind: SignalKind,
    scope: String,
    contract: Contract<S>,
    progress: ProgressLog,
    trace_id: String,
    started_at: DateTime<Utc>,
    token: Option<String>,
    invocations: u32,
}

impl<'a, W: Worker, N: Notifier, S: ContractSignal> Session<'a, W, N, S> {
    /// Begin a run. `resume_token` seeds the first invocation.
    pub fn start(
        services: &'a Services<W, N>,
        scope: impl Into<String>,
        contract: Contract<S>,
        resume_token: Option<String>,
    ) -> Self {
        let kind = S::KIND;
        let trace_id = Uuid::now_v7().to_string();
        let scope = scope.into();
        info!(kind = %kind, trace_id = %trace_id, scope = %scope, "run started");
        Self {
            services,
            kind,
            scope,
            contract,
            progress: ProgressLog::new(&services.paths.progress_path),
            trace_id,
            started_at: Utc::now(),
            token: resume_token.filter(|t| !t.trim().is_empty()),
            invocations: 0,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn progress(&self, message: &str) {
        self.progress.append(self.kind, self.token(), message);
    }

    /// One blocking invocation, resolved to exactly one signal or a run error.
    ///
    /// The envelope's token replaces the current one whenever present, even
    /// when the payload turns out to be unusable.
    pub fn invoke(&mut self, prompt: String) -> Result<S, RunError> {
        self.invocations += 1;
        let request = WorkerRequest {
            workdir: self.services.paths.root.clone(),
            prompt,
            continuation_token: self.token.clone(),
            schema: self.contract.schema_text.clone(),
            log_path: self
                .services
                .paths
                .run_dir(&self.trace_id)
                .join(format!("{}.log", self.invocations)),
        };

        let reply = self.services.worker.invoke(&request).map_err(|err| {
            error!(
                category = WORKER_INVOCATION_FAILURE,
                kind = %self.kind,
                scope = %self.scope,
                token = self.token.as_deref().unwrap_or("-"),
                err = %format!("{err:#}"),
                "worker invocation failed"
            );
            RunError {
                category: WORKER_INVOCATION_FAILURE.to_string(),
                message: format!("{err:#}"),
            }
        })?;

        let validated = parse_envelope(&reply.stdout).and_then(|envelope| {
            if let Some(token) = envelope.continuation_token {
                self.token = Some(token);
            }
            self.contract
                .validator
                .validate_payload(envelope.structured_output)
        });

        validated.map_err(|err| {
            error!(
                category = err.category(),
                kind = %self.kind,
                scope = %self.scope,
                token = self.token.as_deref().unwrap_or("-"),
                err = %err,
                "worker output rejected"
            );
            RunError {
                category: err.category().to_string(),
                message: err.to_string(),
            }
        })
    }

    /// Write the run record, the final progress line and, for critical
    /// endings, a notification. `extend` fills driver-specific fields.
    pub fn finish(
        self,
        conclusion: Conclusion,
        extend: impl FnOnce(&mut RunRecord),
    ) -> RunOutcome {
        let mut record = RunRecord::new(
            self.kind,
            &self.trace_id,
            &self.scope,
            conclusion.status,
            self.started_at,
            Utc::now(),
        );
        record.continuation_token = self.token.clone();
        record.invocations = self.invocations;
        record.completed = conclusion.completed;
        record.blockers = conclusion.blockers;
        record.error = conclusion.error;
        record.summary = conclusion.summary;
        extend(&mut record);

        let archive = self.services.archiver.archive(&record);

        let message = format!(
            "run {}: {} ({} invocations, trace {})",
            record.status, conclusion.reason, record.invocations, record.trace_id
        );
        self.progress(&message);

        if record.status.is_critical() {
            warn!(
                kind = %self.kind,
                status = %record.status,
                scope = %self.scope,
                token = self.token.as_deref().unwrap_or("-"),
                reason = %conclusion.reason,
                "run ended without completing"
            );
            let alert = format!(
                "loopctl {} {} on {}: {} (token {})",
                self.kind,
                record.status,
                self.scope,
                conclusion.reason,
                self.token.as_deref().unwrap_or("-")
            );
            self.services
                .notifier
                .notify_critical(&alert, Severity::Fatal);
        } else {
            info!(kind = %self.kind, trace_id = %record.trace_id, reason = %conclusion.reason, "run complete");
        }

        RunOutcome {
            exit_code: exit_codes::for_status(record.status),
            record,
            archive,
        }
    }
}
