//! Canonical locations of controller-owned files under `.loopctl/`.

use std::path::PathBuf;

use crate::core::types::SignalKind;

/// Name of the controller directory inside a work directory.
pub const STATE_DIR_NAME: &str = ".loopctl";

/// All canonical paths within `.loopctl/` for a work directory.
#[derive(Debug, Clone)]
pub struct ControllerPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub locks_dir: PathBuf,
    pub config_path: PathBuf,
    pub history_dir: PathBuf,
    pub metrics_path: PathBuf,
    pub progress_path: PathBuf,
    pub runs_dir: PathBuf,
    pub schemas_dir: PathBuf,
    pub prompts_dir: PathBuf,
}

impl ControllerPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(STATE_DIR_NAME);
        Self {
            root: root.clone(),
            state_dir: state_dir.clone(),
            locks_dir: state_dir.join("locks"),
            config_path: state_dir.join("config.toml"),
            history_dir: state_dir.join("history"),
            metrics_path: state_dir.join("metrics").join("runs.jsonl"),
            progress_path: state_dir.join("progress.log"),
            runs_dir: state_dir.join("runs"),
            schemas_dir: state_dir.join("schemas"),
            prompts_dir: state_dir.join("prompts"),
        }
    }

    /// Deployed schema override for `kind`.
    pub fn schema_path(&self, kind: SignalKind) -> PathBuf {
        self.schemas_dir.join(format!("{kind}.schema.json"))
    }

    /// Deployed prompt template override for `kind`.
    pub fn prompt_path(&self, kind: SignalKind) -> PathBuf {
        self.prompts_dir.join(format!("{kind}.md"))
    }

    /// Directory for per-invocation worker logs of one run.
    pub fn run_dir(&self, trace_id: &str) -> PathBuf {
        self.runs_dir.join(trace_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_stable() {
        let paths = ControllerPaths::new("/work");
        assert!(paths.locks_dir.ends_with(".loopctl/locks"));
        assert!(paths.metrics_path.ends_with(".loopctl/metrics/runs.jsonl"));
        assert!(
            paths
                .schema_path(SignalKind::Improve)
                .ends_with(".loopctl/schemas/improve.schema.json")
        );
        assert!(
            paths
                .prompt_path(SignalKind::Build)
                .ends_with(".loopctl/prompts/build.md")
        );
        assert!(paths.run_dir("t-1").ends_with(".loopctl/runs/t-1"));
    }
}
