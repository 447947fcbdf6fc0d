//! Diagnostic tracing for the orchestrator binary.
//!
//! Tracing goes to stderr and is filtered by `RUST_LOG`. It is never part of
//! a run's output: the report, ledger and tool history are written by
//! [`crate::io::run_log`] under `.orchestrator/runs/` whatever the filter says.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber: compact events on stderr, `warn` and above
/// unless `RUST_LOG` says otherwise.
///
/// Oracle degradations and dependency problems log at `warn`; batch and task
/// lifecycle at `info`; ignored checklist operations at `debug`.
///
/// ```bash
/// RUST_LOG=orchestrator=info orchestrator run "Summarize the changelog"
/// ```
pub fn init() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
