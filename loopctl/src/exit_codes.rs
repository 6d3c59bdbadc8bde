//! Stable exit codes shared by both drivers.

use crate::core::types::RunStatus;

/// Run completed normally (including an exhausted iteration budget).
pub const OK: i32 = 0;
/// Run failed or errored, or could not start. Resumable via the recorded token.
pub const FAILED: i32 = 1;
/// Worker is blocked on human input.
pub const BLOCKED: i32 = 2;

pub fn for_status(status: RunStatus) -> i32 {
    match status {
        RunStatus::Complete => OK,
        RunStatus::Blocked => BLOCKED,
        RunStatus::Failed | RunStatus::Error => FAILED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_codes() {
        assert_eq!(for_status(RunStatus::Complete), 0);
        assert_eq!(for_status(RunStatus::Blocked), 2);
        assert_eq!(for_status(RunStatus::Failed), 1);
        assert_eq!(for_status(RunStatus::Error), 1);
    }
}
