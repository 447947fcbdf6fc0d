//! Goal-execution scheduler.
//!
//! A goal is analyzed and decomposed by a reasoning oracle into a checklist of
//! dependency-ordered tasks. The controller then runs batches of runnable
//! tasks under a concurrency limit, scores progress through the oracle, and
//! reflects on sustained failure by adjusting the checklist, until the goal is
//! judged achieved or no work can proceed.
//!
//! - **[`core`]**: Pure logic (checklist, batch selection, reflection trigger,
//!   dependency diagnostics). No I/O.
//! - **[`io`]**: Side effects (config, agent processes, prompts, run artifacts).
//! - **[`oracle`]** and **[`tools`]**: the two collaborator seams, as traits.
//!
//! Orchestration modules ([`task_executor`], [`coordinator`], [`orchestrate`])
//! tie the core to the collaborators; [`report`] renders the outcome.

pub mod coordinator;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod oracle;
pub mod orchestrate;
pub mod report;
pub mod task_executor;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
