//! Task-sequencer: one worker invocation per plan task, in document order.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{info, instrument, warn};

use crate::core::gate::{Decision, StopReason, build_gate};
use crate::core::plan::{extract_task_ids, resume_from};
use crate::core::record::RunError;
use crate::core::types::{BuildSignal, RunStatus, SignalKind};
use crate::driver::session::{Conclusion, PROMPT_RENDER_FAILURE};
use crate::driver::{RunOutcome, Services, session::Session};
use crate::io::contract::load_contract;
use crate::io::notify::Notifier;
use crate::io::prompt::{BuildPromptInput, PromptEngine};
use crate::io::worker::Worker;

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Plan document; relative paths are taken from the work directory.
    pub plan: PathBuf,
    /// Start from this task id, skipping earlier ones.
    pub from: Option<String>,
    /// Continuation token for the first invocation.
    pub session: Option<String>,
}

#[instrument(skip_all, fields(plan = %options.plan.display()))]
pub fn run_build<W: Worker, N: Notifier>(
    services: &Services<W, N>,
    options: &BuildOptions,
) -> Result<RunOutcome> {
    let plan_path = services.paths.root.join(&options.plan);
    let plan_text =
        fs::read_to_string(&plan_path).with_context(|| format!("read plan {}", plan_path.display()))?;
    let ids = extract_task_ids(&plan_text);
    if ids.is_empty() {
        bail!("no task ids found in {}", plan_path.display());
    }
    let tasks = resume_from(&ids, options.from.as_deref()).ok_or_else(|| {
        anyhow!(
            "task {} not found in {}",
            options.from.as_deref().unwrap_or_default(),
            plan_path.display()
        )
    })?;
    let contract = load_contract::<BuildSignal>(&services.paths)?;
    let prompts = PromptEngine::load(&services.paths, SignalKind::Build)?;

    let _lock = services.locks.acquire(SignalKind::Build)?;

    let scope = options.plan.display().to_string();
    let mut session = Session::start(
        services,
        scope.as_str(),
        contract,
        options.session.clone(),
    );
    session.progress(&format!(
        "build started: {} task(s) from {scope}{}",
        tasks.len(),
        options
            .from
            .as_deref()
            .map(|id| format!(", resuming at {id}"))
            .unwrap_or_default()
    ));

    let mut completed: Vec<String> = Vec::new();
    let mut summary = None;
    let mut last_task = None;
    let mut conclusion = None;

    for (index, task_id) in tasks.iter().enumerate() {
        last_task = Some(task_id.clone());
        let rendered = prompts.render_build(&BuildPromptInput {
            plan: &scope,
            task_id,
            position: index + 1,
            total: tasks.len(),
            remaining: &tasks[index + 1..],
            resumed: options.from.is_some() || options.session.is_some(),
        });
        let prompt = match rendered {
            Ok(prompt) => prompt,
            Err(err) => {
                conclusion = Some(errored(
                    PROMPT_RENDER_FAILURE,
                    format!("{err:#}"),
                    format!("task {task_id}: prompt could not be rendered"),
                ));
                break;
            }
        };

        info!(task_id = %task_id, position = index + 1, "starting task");
        let signal = match session.invoke(prompt) {
            Ok(signal) => signal,
            Err(run_error) => {
                let reason = format!("task {task_id}: {}", run_error.category);
                session.progress(&reason);
                let mut stop = Conclusion::new(RunStatus::Error, reason);
                stop.error = Some(run_error);
                conclusion = Some(stop);
                break;
            }
        };

        if signal.task_id != *task_id {
            warn!(expected = %task_id, reported = %signal.task_id, "worker reported a different task id");
        }
        if !signal.summary.trim().is_empty() {
            summary = Some(signal.summary.clone());
        }

        match build_gate(&signal) {
            Decision::Continue => {
                completed.push(task_id.clone());
                session.progress(&format!("task {task_id}: done, tests passed"));
            }
            Decision::Stop(reason) => {
                if reason == StopReason::WorkerComplete {
                    completed.push(task_id.clone());
                }
                session.progress(&format!("task {task_id}: {reason}"));
                let mut stop = Conclusion::new(reason.status(), format!("task {task_id}: {reason}"));
                if reason.status() != RunStatus::Complete {
                    stop.blockers = signal.blockers.clone();
                }
                conclusion = Some(stop);
                break;
            }
        }
    }

    let mut conclusion = conclusion
        .unwrap_or_else(|| Conclusion::new(RunStatus::Complete, "every task in the plan completed"));
    conclusion.completed = completed;
    conclusion.summary = summary;

    let resumed_from = options.from.clone();
    Ok(session.finish(conclusion, |record| {
        record.task_id = last_task;
        record.resumed_from = resumed_from;
    }))
}

fn errored(category: &str, message: String, reason: String) -> Conclusion {
    let mut stop = Conclusion::new(RunStatus::Error, reason);
    stop.error = Some(RunError {
        category: category.to_string(),
        message,
    });
    stop
}
