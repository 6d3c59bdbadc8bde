//! Test-only helpers: scripted workers, recording notifiers and reply builders.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::driver::Services;
use crate::io::config::{ConfigResolver, ConfigTiers};
use crate::io::notify::{Notifier, Severity};
use crate::io::paths::ControllerPaths;
use crate::io::worker::{Worker, WorkerReply, WorkerRequest};

/// Worker that replays queued replies and records every request.
#[derive(Debug, Default)]
pub struct ScriptedWorker {
    replies: RefCell<VecDeque<Result<String, String>>>,
    requests: RefCell<Vec<WorkerRequest>>,
    watched_lock: Option<PathBuf>,
    lock_snapshots: RefCell<Vec<Option<String>>>,
}

impl ScriptedWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw stdout reply.
    pub fn reply(self, stdout: impl Into<String>) -> Self {
        self.replies.borrow_mut().push_back(Ok(stdout.into()));
        self
    }

    /// Queue an invocation failure.
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.replies.borrow_mut().push_back(Err(message.into()));
        self
    }

    /// Read the lock file at `path` during every invocation.
    pub fn watch_lock(mut self, path: impl Into<PathBuf>) -> Self {
        self.watched_lock = Some(path.into());
        self
    }

    /// Trimmed lock contents seen by each invocation, `None` when absent.
    pub fn lock_snapshots(&self) -> Vec<Option<String>> {
        self.lock_snapshots.borrow().clone()
    }

    pub fn requests(&self) -> Vec<WorkerRequest> {
        self.requests.borrow().clone()
    }

    pub fn invocations(&self) -> usize {
        self.requests.borrow().len()
    }

    /// Tokens carried by each request, in order.
    pub fn tokens(&self) -> Vec<Option<String>> {
        self.requests
            .borrow()
            .iter()
            .map(|request| request.continuation_token.clone())
            .collect()
    }

    pub fn assert_drained(&self) {
        let left = self.replies.borrow().len();
        assert_eq!(left, 0, "{left} scripted replies were never consumed");
    }
}

impl Worker for ScriptedWorker {
    fn invoke(&self, request: &WorkerRequest) -> Result<WorkerReply> {
        self.requests.borrow_mut().push(request.clone());
        if let Some(path) = &self.watched_lock {
            let contents = fs::read_to_string(path).ok();
            self.lock_snapshots
                .borrow_mut()
                .push(contents.map(|c| c.trim().to_string()));
        }
        match self.replies.borrow_mut().pop_front() {
            Some(Ok(stdout)) => Ok(WorkerReply { stdout }),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted worker has no reply left")),
        }
    }
}

/// Notifier that records instead of sending.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: RefCell<Vec<(String, Severity)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, Severity)> {
        self.sent.borrow().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify_critical(&self, message: &str, severity: Severity) {
        self.sent.borrow_mut().push((message.to_string(), severity));
    }
}

/// Pid of a live process other than this one, to stand in for another run.
pub fn live_foreign_pid() -> i32 {
    #[cfg(unix)]
    {
        std::os::unix::process::parent_id() as i32
    }

    #[cfg(not(unix))]
    {
        1
    }
}

/// Services rooted at `root`, reading only the instance config tier.
pub fn services<W, N>(root: &Path, worker: W, notifier: N) -> Services<W, N> {
    let paths = ControllerPaths::new(root);
    let config = ConfigResolver::load(&ConfigTiers {
        instance: Some(paths.config_path.clone()),
        group: None,
        global: None,
    });
    Services::new(paths, config, worker, notifier)
}

/// Worker stdout wrapping `payload` with a continuation token.
pub fn envelope(token: &str, payload: Value) -> String {
    json!({
        "type": "result",
        "is_error": false,
        "session_id": token,
        "structured_output": payload,
    })
    .to_string()
}

pub fn build_reply(token: &str, task_id: &str, status: &str, tests_passed: bool) -> String {
    envelope(
        token,
        json!({
            "status": status,
            "task_id": task_id,
            "completed_tasks": [],
            "blockers": [],
            "tests_passed": tests_passed,
            "summary": format!("{task_id} {status}"),
        }),
    )
}

pub fn improve_reply(token: &str, iteration: u32, status: &str, delta: f64) -> String {
    envelope(
        token,
        json!({
            "status": status,
            "iteration": iteration,
            "delta": delta,
            "metrics": { "score": iteration },
            "completed": [format!("item-{iteration}")],
            "skipped": [],
            "blockers": [],
            "summary": format!("iteration {iteration}"),
        }),
    )
}
