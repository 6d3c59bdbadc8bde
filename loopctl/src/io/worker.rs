//! Worker abstraction for reasoning-process invocation.
//!
//! The [`Worker`] trait decouples the drivers from the actual worker backend.
//! Tests use scripted workers that return predetermined replies without
//! spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::config::{
    ConfigResolver, DEFAULT_WORKER_COMMAND, WORKER_ARGS, WORKER_COMMAND,
};
use crate::io::process::{CommandOutput, run_command};

/// Bytes of worker stderr kept for the invocation log.
pub const DEFAULT_STDERR_LIMIT_BYTES: usize = 100_000;

/// Parameters for one worker invocation.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    /// Working directory for the worker process.
    pub workdir: PathBuf,
    /// Prompt text for the worker.
    pub prompt: String,
    /// Token returned by the previous invocation, if any.
    pub continuation_token: Option<String>,
    /// JSON Schema the worker's structured output must satisfy.
    pub schema: String,
    /// Where to write this invocation's stdout/stderr log.
    pub log_path: PathBuf,
}

/// Raw reply of a completed invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReply {
    pub stdout: String,
}

/// Abstraction over worker backends.
pub trait Worker {
    /// Run one blocking invocation. `Err` means the invocation itself did not
    /// complete (spawn failure, non-zero exit).
    fn invoke(&self, request: &WorkerRequest) -> Result<WorkerReply>;
}

/// Worker that spawns a CLI accepting `-p --output-format json --json-schema`.
#[derive(Debug, Clone)]
pub struct CliWorker {
    command: String,
    args: Vec<String>,
    stderr_limit_bytes: usize,
}

impl CliWorker {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            stderr_limit_bytes: DEFAULT_STDERR_LIMIT_BYTES,
        }
    }

    /// Build from `worker.command` and `worker.args`.
    pub fn from_config(config: &ConfigResolver) -> Self {
        let command = config.resolve(WORKER_COMMAND, DEFAULT_WORKER_COMMAND).value;
        let args = config
            .resolve(WORKER_ARGS, "")
            .value
            .split_whitespace()
            .map(str::to_string)
            .collect();
        Self::new(command, args)
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn build_command(&self, request: &WorkerRequest) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .arg("-p")
            .arg("--output-format")
            .arg("json")
            .arg("--json-schema")
            .arg(&request.schema);
        if let Some(token) = &request.continuation_token {
            cmd.arg("--resume").arg(token);
        }
        cmd.current_dir(&request.workdir);
        cmd
    }
}

impl Worker for CliWorker {
    #[instrument(skip_all, fields(command = %self.command, resume = request.continuation_token.is_some()))]
    fn invoke(&self, request: &WorkerRequest) -> Result<WorkerReply> {
        info!(workdir = %request.workdir.display(), "invoking worker");

        let cmd = self.build_command(request);
        let output = run_command(cmd, Some(request.prompt.as_bytes()), self.stderr_limit_bytes)
            .map_err(|err| anyhow!("run {}: {err:#}", self.command))?;

        write_worker_log(&request.log_path, &output);

        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "worker exited unsuccessfully");
            return Err(anyhow!(
                "{} exited with status {:?}",
                self.command,
                output.status.code()
            ));
        }

        debug!(bytes = output.stdout.len(), "worker completed");
        Ok(WorkerReply {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

fn write_worker_log(path: &Path, output: &CommandOutput) {
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    buf.push_str(&output.stderr_truncated_notice("worker"));

    let written = path
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|()| fs::write(path, buf));
    if let Err(err) = written {
        warn!(path = %path.display(), err = %err, "failed to write worker log");
    }
}
