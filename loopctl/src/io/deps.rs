//! Startup probe for required external tools.

use std::env;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
#[error("required tool '{tool}' not found: {reason}")]
pub struct DependencyMissing {
    pub tool: String,
    pub reason: String,
}

/// Resolve `tool` on `PATH` before any run state is touched. A tool given as
/// a relative path is resolved against `workdir`, where it will be spawned.
pub fn require_tool(tool: &str, workdir: &Path) -> Result<PathBuf, DependencyMissing> {
    match which::which_in(tool, env::var_os("PATH"), workdir) {
        Ok(path) => {
            debug!(tool, path = %path.display(), "dependency found");
            Ok(path)
        }
        Err(err) => Err(DependencyMissing {
            tool: tool.to_string(),
            reason: err.to_string(),
        }),
    }
}
