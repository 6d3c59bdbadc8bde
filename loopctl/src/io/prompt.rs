//! Prompt rendering for worker invocations.

use std::fs;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::{debug, info};

use crate::core::types::SignalKind;
use crate::io::paths::ControllerPaths;

const BUILD_TEMPLATE: &str = include_str!("prompts/build.md");
const IMPROVE_TEMPLATE: &str = include_str!("prompts/improve.md");

/// Inputs for one build-task prompt.
#[derive(Debug, Clone)]
pub struct BuildPromptInput<'a> {
    pub plan: &'a str,
    pub task_id: &'a str,
    /// 1-based position within the run's task list.
    pub position: usize,
    pub total: usize,
    pub remaining: &'a [String],
    pub resumed: bool,
}

/// Inputs for one improve-iteration prompt.
#[derive(Debug, Clone)]
pub struct ImprovePromptInput<'a> {
    pub scope: &'a str,
    pub iteration: u32,
    pub max_iterations: u32,
    pub threshold: f64,
    pub next_focus: Option<&'a str>,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
    template: String,
}

impl PromptEngine {
    /// Load the template for `kind`, preferring a deployed override.
    pub fn load(paths: &ControllerPaths, kind: SignalKind) -> Result<Self> {
        let path = paths.prompt_path(kind);
        let template = if path.exists() {
            info!(kind = %kind, path = %path.display(), "using deployed prompt template");
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?
        } else {
            debug!(kind = %kind, "using embedded prompt template");
            embedded_template(kind).to_string()
        };
        Ok(Self::from_template(template))
    }

    pub fn from_template(template: impl Into<String>) -> Self {
        Self {
            env: Environment::new(),
            template: template.into(),
        }
    }

    pub fn render_build(&self, input: &BuildPromptInput<'_>) -> Result<String> {
        self.env
            .render_str(
                &self.template,
                context! {
                    plan => input.plan,
                    task_id => input.task_id,
                    position => input.position,
                    total => input.total,
                    remaining => input.remaining,
                    resumed => input.resumed,
                },
            )
            .context("render build prompt")
    }

    pub fn render_improve(&self, input: &ImprovePromptInput<'_>) -> Result<String> {
        self.env
            .render_str(
                &self.template,
                context! {
                    scope => input.scope,
                    iteration => input.iteration,
                    max_iterations => input.max_iterations,
                    threshold => input.threshold,
                    next_focus => input.next_focus.map(str::trim).filter(|s| !s.is_empty()),
                },
            )
            .context("render improve prompt")
    }
}

fn embedded_template(kind: SignalKind) -> &'static str {
    match kind {
        SignalKind::Build => BUILD_TEMPLATE,
        SignalKind::Improve => IMPROVE_TEMPLATE,
    }
}
