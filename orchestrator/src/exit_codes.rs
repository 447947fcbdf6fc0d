//! Stable exit codes for orchestrator CLI commands.

/// Command succeeded; for `run`, the goal was achieved.
pub const OK: i32 = 0;
/// Invalid config or arguments, or an error before the run started.
pub const INVALID: i32 = 1;
/// `run` hit the iteration limit before the goal was achieved.
pub const INCOMPLETE: i32 = 2;
/// `run` ended with pending tasks that can never become runnable.
pub const NO_VIABLE_TASKS: i32 = 3;
/// `run` was aborted by a hard oracle failure.
pub const ABORTED: i32 = 4;
