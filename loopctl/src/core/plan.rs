//! Task identifier extraction from a free-form plan document.
//!
//! Task order is document order; dependencies are implied by position and are
//! not resolved separately. A task is announced by a markdown heading or a
//! checklist item whose first token looks like an id (`T1`, `TASK-004`,
//! `P2.1`), optionally prefixed with the word `Task`:
//!
//! ```text
//! ## T1: Scaffold the crate
//! ### Task TASK-002 - Parser
//! - [ ] **T3** wire the CLI
//! ```
//!
//! Lines inside fenced code blocks are ignored. Repeated ids keep their first
//! position.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ {0,3}#{1,6}\s+(.+)$").expect("heading regex"));
static CHECKLIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*+]\s+\[[ xX]\]\s+(.+)$").expect("checklist regex"));
static TASK_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i:task\s+)?[*_`\[]*([A-Za-z][A-Za-z0-9]*[-_.]?\d+(?:\.\d+)*)[*_`\]]*(?:[:).\s]|$)")
        .expect("task id regex")
});

/// Extract task ids from `plan` in document order.
pub fn extract_task_ids(plan: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let mut seen = HashSet::new();
    let mut in_fence = false;

    for line in plan.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }

        let Some(rest) = HEADING_RE
            .captures(line)
            .or_else(|| CHECKLIST_RE.captures(line))
            .and_then(|caps| caps.get(1))
        else {
            continue;
        };
        let Some(id) = TASK_ID_RE
            .captures(rest.as_str().trim())
            .and_then(|caps| caps.get(1))
        else {
            continue;
        };

        let id = id.as_str().to_string();
        if seen.insert(id.clone()) {
            ids.push(id);
        }
    }

    ids
}

/// Slice `ids` so it starts at `start`, or `None` when `start` is not present.
pub fn resume_from<'a>(ids: &'a [String], start: Option<&str>) -> Option<&'a [String]> {
    match start {
        None => Some(ids),
        Some(start) => ids
            .iter()
            .position(|id| id == start)
            .map(|idx| &ids[idx..]),
    }
}
