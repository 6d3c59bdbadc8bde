//! Run record: the immutable summary of one driver execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::{RunStatus, SignalKind};

/// Failure detail attached to a record when the run ended in `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    /// Stable category (`contract_missing`, `worker_invocation_failure`, ...).
    pub category: String,
    pub message: String,
}

/// Archived once per run, after the final signal (or lack of one) is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// When the run finished; also names the history file.
    pub timestamp: DateTime<Utc>,
    pub trace_id: String,
    pub span_kind: SignalKind,
    /// Latest token handed out by the worker, for resuming.
    pub continuation_token: Option<String>,
    /// Plan path (build) or scope path (improve).
    pub scope: String,
    pub status: RunStatus,
    /// Completed task ids (build) or accumulated completed items (improve).
    pub completed: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Worker invocations attempted during the run.
    pub invocations: u32,
    pub blockers: Vec<String>,
    pub error: Option<RunError>,
    /// Summary from the last valid signal.
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_metrics: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_metrics: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
}

impl RunRecord {
    /// Start a record with every optional field empty.
    pub fn new(
        span_kind: SignalKind,
        trace_id: impl Into<String>,
        scope: impl Into<String>,
        status: RunStatus,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            timestamp: finished_at,
            trace_id: trace_id.into(),
            span_kind,
            continuation_token: None,
            scope: scope.into(),
            status,
            completed: Vec::new(),
            started_at,
            finished_at,
            duration_ms,
            invocations: 0,
            blockers: Vec::new(),
            error: None,
            summary: None,
            task_id: None,
            resumed_from: None,
            iterations: None,
            baseline_metrics: None,
            final_metrics: None,
            delta: None,
        }
    }
}
