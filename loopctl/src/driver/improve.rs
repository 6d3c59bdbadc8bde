//! Iteration driver: bounded improve loop gated on the delta threshold.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::core::gate::{Decision, StopReason, improve_gate};
use crate::core::record::RunError;
use crate::core::types::{ImproveSignal, RunStatus, SignalKind};
use crate::driver::session::{Conclusion, PROMPT_RENDER_FAILURE, Session};
use crate::driver::{RunOutcome, Services};
use crate::io::config::{
    DEFAULT_MAX_ITERATIONS, DEFAULT_THRESHOLD, IMPROVE_MAX_ITERATIONS, IMPROVE_THRESHOLD,
};
use crate::io::contract::load_contract;
use crate::io::notify::Notifier;
use crate::io::prompt::{ImprovePromptInput, PromptEngine};
use crate::io::worker::Worker;

#[derive(Debug, Clone, Default)]
pub struct ImproveOptions {
    /// Path (or other reference) the worker should improve.
    pub scope: String,
    /// Overrides `improve.max_iterations`; validated before the run starts.
    pub max_iterations: Option<String>,
    /// Overrides `improve.threshold`; validated before the run starts.
    pub threshold: Option<String>,
    /// Continuation token for the first invocation.
    pub session: Option<String>,
}

/// Iteration budget and delta threshold after tier resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImproveLimits {
    pub max_iterations: u32,
    pub threshold: f64,
}

impl ImproveLimits {
    pub fn resolve<W, N>(services: &Services<W, N>, options: &ImproveOptions) -> Result<Self> {
        let config = &services.config;
        let max_iterations = config
            .resolve_override(
                IMPROVE_MAX_ITERATIONS,
                options.max_iterations.as_deref(),
                DEFAULT_MAX_ITERATIONS,
            )
            .as_positive_u32()
            .context("configuration error")?;
        let threshold = config
            .resolve_override(IMPROVE_THRESHOLD, options.threshold.as_deref(), DEFAULT_THRESHOLD)
            .as_f64()
            .context("configuration error")?;
        Ok(Self {
            max_iterations,
            threshold,
        })
    }
}

#[instrument(skip_all, fields(scope = %options.scope))]
pub fn run_improve<W: Worker, N: Notifier>(
    services: &Services<W, N>,
    options: &ImproveOptions,
) -> Result<RunOutcome> {
    let limits = ImproveLimits::resolve(services, options)?;
    let contract = load_contract::<ImproveSignal>(&services.paths)?;
    let prompts = PromptEngine::load(&services.paths, SignalKind::Improve)?;

    let _lock = services.locks.acquire(SignalKind::Improve)?;

    let mut session = Session::start(
        services,
        options.scope.as_str(),
        contract,
        options.session.clone(),
    );
    session.progress(&format!(
        "improve started on {}: up to {} iteration(s), threshold {}",
        options.scope, limits.max_iterations, limits.threshold
    ));

    let mut completed: Vec<String> = Vec::new();
    let mut iterations = 0;
    let mut baseline: Option<Value> = None;
    let mut latest: Option<Value> = None;
    let mut delta = None;
    let mut next_focus: Option<String> = None;
    let mut summary = None;
    let mut conclusion = None;

    for iteration in 1..=limits.max_iterations {
        iterations = iteration;
        let rendered = prompts.render_improve(&ImprovePromptInput {
            scope: &options.scope,
            iteration,
            max_iterations: limits.max_iterations,
            threshold: limits.threshold,
            next_focus: next_focus.as_deref(),
        });
        let prompt = match rendered {
            Ok(prompt) => prompt,
            Err(err) => {
                let mut stop = Conclusion::new(
                    RunStatus::Error,
                    format!("iteration {iteration}: prompt could not be rendered"),
                );
                stop.error = Some(RunError {
                    category: PROMPT_RENDER_FAILURE.to_string(),
                    message: format!("{err:#}"),
                });
                conclusion = Some(stop);
                break;
            }
        };

        info!(iteration, "starting iteration");
        let signal = match session.invoke(prompt) {
            Ok(signal) => signal,
            Err(run_error) => {
                let reason = format!("iteration {iteration}: {}", run_error.category);
                session.progress(&reason);
                let mut stop = Conclusion::new(RunStatus::Error, reason);
                stop.error = Some(run_error);
                conclusion = Some(stop);
                break;
            }
        };

        if signal.iteration != iteration {
            warn!(expected = iteration, reported = signal.iteration, "worker reported a different iteration");
        }
        if baseline.is_none() {
            baseline = Some(signal.metrics.clone());
        }
        latest = Some(signal.metrics.clone());
        delta = Some(signal.delta);
        completed.extend(signal.completed.iter().cloned());
        next_focus = signal.next_focus.clone();
        if !signal.summary.trim().is_empty() {
            summary = Some(signal.summary.clone());
        }

        match improve_gate(&signal, limits.threshold) {
            Decision::Continue => {
                session.progress(&format!(
                    "iteration {iteration}: loop, delta {}",
                    signal.delta
                ));
            }
            Decision::Stop(reason) => {
                session.progress(&format!("iteration {iteration}: {reason}"));
                let mut stop =
                    Conclusion::new(reason.status(), format!("iteration {iteration}: {reason}"));
                if reason == StopReason::Blocked {
                    stop.blockers = signal.blockers.clone();
                }
                conclusion = Some(stop);
                break;
            }
        }
    }

    let mut conclusion = conclusion.unwrap_or_else(|| {
        Conclusion::new(
            RunStatus::Complete,
            format!("iteration budget of {} exhausted", limits.max_iterations),
        )
    });
    conclusion.completed = completed;
    conclusion.summary = summary;

    Ok(session.finish(conclusion, |record| {
        record.iterations = Some(iterations);
        record.baseline_metrics = baseline;
        record.final_metrics = latest;
        record.delta = delta;
    }))
}
