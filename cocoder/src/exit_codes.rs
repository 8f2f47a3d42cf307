//! Stable exit codes for the `cocoder` CLI.

/// The task reached a terminal outcome.
pub const OK: i32 = 0;
/// Invalid or missing configuration (bad flags, workspace, provider settings).
pub const INVALID: i32 = 1;
/// A session budget (prompts, per-request tokens, total tokens) was exhausted.
pub const BUDGET_EXCEEDED: i32 = 2;
/// Any other fatal error (provider failure, unexpected outcome, I/O).
pub const FAILED: i32 = 3;

/// Map a task failure to its exit code.
pub fn for_error(err: &anyhow::Error) -> i32 {
    use crate::error::{BudgetExceeded, TaskError};

    if let Some(TaskError::Configuration(_)) = err.downcast_ref::<TaskError>() {
        return INVALID;
    }
    if err.downcast_ref::<BudgetExceeded>().is_some() {
        return BUDGET_EXCEEDED;
    }
    FAILED
}
