//! Shared deterministic types for controller core logic.
//!
//! These types define stable contracts between the validator, the gating rules
//! and the drivers. They do not touch I/O and serialize to stable JSON.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which driver a signal, scope or record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Build,
    Improve,
}

impl SignalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::Build => "build",
            SignalKind::Improve => "improve",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker-declared status for a build task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Next,
    Complete,
    Blocked,
    Failed,
}

impl BuildStatus {
    pub const ALL: [&'static str; 4] = ["next", "complete", "blocked", "failed"];
}

/// Worker-declared status for an improve iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImproveStatus {
    Loop,
    Complete,
    Blocked,
    Error,
}

impl ImproveStatus {
    pub const ALL: [&'static str; 4] = ["loop", "complete", "blocked", "error"];
}

/// Structured result of one build-task invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSignal {
    pub status: BuildStatus,
    pub task_id: String,
    #[serde(default)]
    pub completed_tasks: Vec<String>,
    #[serde(default)]
    pub next_task: Option<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    pub tests_passed: bool,
    #[serde(default)]
    pub commit_ref: Option<String>,
    #[serde(default)]
    pub summary: String,
}

/// Structured result of one improve iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImproveSignal {
    pub status: ImproveStatus,
    pub iteration: u32,
    pub delta: f64,
    #[serde(default)]
    pub metrics: Value,
    #[serde(default)]
    pub completed: Vec<String>,
    #[serde(default)]
    pub skipped: Vec<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub next_focus: Option<String>,
    #[serde(default)]
    pub summary: String,
}

/// A contract-validated worker result. Implemented by [`BuildSignal`] and
/// [`ImproveSignal`]; each driver is bound to its variant at compile time.
pub trait ContractSignal: DeserializeOwned {
    const KIND: SignalKind;
    /// Closed `status` set of this variant.
    const STATUSES: &'static [&'static str];
}

impl ContractSignal for BuildSignal {
    const KIND: SignalKind = SignalKind::Build;
    const STATUSES: &'static [&'static str] = &BuildStatus::ALL;
}

impl ContractSignal for ImproveSignal {
    const KIND: SignalKind = SignalKind::Improve;
    const STATUSES: &'static [&'static str] = &ImproveStatus::ALL;
}

/// Terminal status of a driver run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Complete,
    Blocked,
    Failed,
    Error,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Complete => "complete",
            RunStatus::Blocked => "blocked",
            RunStatus::Failed => "failed",
            RunStatus::Error => "error",
        }
    }

    /// Whether this termination warrants an outbound alert.
    pub fn is_critical(self) -> bool {
        !matches!(self, RunStatus::Complete)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
