//! Gating rules for both drivers.
//!
//! Decisions depend only on the most recent signal and static configuration
//! (threshold). Iteration budgets are enforced by the improve driver's loop
//! bound, not here.

use std::fmt;

use crate::core::types::{BuildSignal, BuildStatus, ImproveSignal, ImproveStatus, RunStatus};

/// What the driver does after folding in a signal.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Continue,
    Stop(StopReason),
}

/// Why a driver stopped before running out of work.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// The worker declared the whole run complete.
    WorkerComplete,
    /// `tests_passed` was false; overrides any status.
    TestsFailed,
    /// The worker declared the task failed.
    WorkerFailed,
    /// The worker needs human input.
    Blocked,
    /// The worker reported an error.
    WorkerError,
    /// Improvement fell under the configured threshold.
    BelowThreshold { delta: f64, threshold: f64 },
}

impl StopReason {
    pub fn status(&self) -> RunStatus {
        match self {
            StopReason::WorkerComplete | StopReason::BelowThreshold { .. } => RunStatus::Complete,
            StopReason::TestsFailed | StopReason::WorkerFailed => RunStatus::Failed,
            StopReason::Blocked => RunStatus::Blocked,
            StopReason::WorkerError => RunStatus::Error,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::WorkerComplete => f.write_str("worker reported complete"),
            StopReason::TestsFailed => f.write_str("tests did not pass"),
            StopReason::WorkerFailed => f.write_str("worker reported failure"),
            StopReason::Blocked => f.write_str("worker is blocked on human input"),
            StopReason::WorkerError => f.write_str("worker reported an error"),
            StopReason::BelowThreshold { delta, threshold } => {
                write!(f, "delta {delta} below threshold {threshold}")
            }
        }
    }
}

/// Gate one build task. The pass/fail field is checked before `status`.
pub fn build_gate(signal: &BuildSignal) -> Decision {
    if !signal.tests_passed {
        return Decision::Stop(StopReason::TestsFailed);
    }
    match signal.status {
        BuildStatus::Next => Decision::Continue,
        BuildStatus::Complete => Decision::Stop(StopReason::WorkerComplete),
        BuildStatus::Blocked => Decision::Stop(StopReason::Blocked),
        BuildStatus::Failed => Decision::Stop(StopReason::WorkerFailed),
    }
}

/// Gate one improve iteration against `threshold`.
///
/// The threshold is authoritative: a `loop` status with `delta < threshold`
/// still stops the run.
pub fn improve_gate(signal: &ImproveSignal, threshold: f64) -> Decision {
    match signal.status {
        ImproveStatus::Loop if signal.delta < threshold => {
            Decision::Stop(StopReason::BelowThreshold {
                delta: signal.delta,
                threshold,
            })
        }
        ImproveStatus::Loop => Decision::Continue,
        ImproveStatus::Complete => Decision::Stop(StopReason::WorkerComplete),
        ImproveStatus::Blocked => Decision::Stop(StopReason::Blocked),
        ImproveStatus::Error => Decision::Stop(StopReason::WorkerError),
    }
}
