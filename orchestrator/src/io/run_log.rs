//! Run artifacts under `.orchestrator/runs/<run_id>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::history::{ExecutionHistory, ToolInvocation};
use crate::core::types::ExecutionResult;
use crate::report::RunReport;

#[derive(Debug, Clone)]
pub struct RunPaths {
    pub dir: PathBuf,
    pub report_path: PathBuf,
    pub ledger_path: PathBuf,
    pub history_path: PathBuf,
}

impl RunPaths {
    pub fn new(state_dir: &Path, run_id: &str) -> Self {
        let dir = state_dir.join("runs").join(run_id);
        Self {
            report_path: dir.join("report.json"),
            ledger_path: dir.join("ledger.json"),
            history_path: dir.join("history.json"),
            dir,
        }
    }
}

/// Sortable, filesystem-safe run id derived from the start time.
pub fn run_id(started_at: DateTime<Utc>) -> String {
    started_at.format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

#[derive(Serialize)]
struct HistoryFile<'a> {
    evicted: usize,
    entries: Vec<&'a ToolInvocation>,
}

pub struct RunWriteRequest<'a> {
    pub state_dir: &'a Path,
    pub report: &'a RunReport,
    pub result: &'a ExecutionResult,
    pub history: &'a ExecutionHistory,
}

pub fn write_run(request: &RunWriteRequest<'_>) -> Result<RunPaths> {
    let paths = RunPaths::new(request.state_dir, &run_id(request.result.started_at));
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create run dir {}", paths.dir.display()))?;

    write_json(&paths.report_path, request.report)?;
    write_json(&paths.ledger_path, request.result)?;
    write_json(
        &paths.history_path,
        &HistoryFile {
            evicted: request.history.evicted(),
            entries: request.history.entries().collect(),
        },
    )?;
    Ok(paths)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checklist::Checklist;
    use crate::core::types::RunStatus;
    use crate::orchestrate::RunOutcome;
    use crate::test_support::goal;

    #[test]
    fn run_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RunPaths::new(temp.path(), "20260101T000000.000Z");
        assert!(
            paths
                .dir
                .ends_with(Path::new("runs/20260101T000000.000Z"))
        );
        assert!(paths.report_path.ends_with("report.json"));
        assert!(paths.history_path.ends_with("history.json"));
    }

    #[test]
    fn writes_report_ledger_and_history() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut result = ExecutionResult::new("g");
        result.finish(RunStatus::Completed);
        let outcome = RunOutcome {
            result,
            checklist: Checklist::new(goal()),
            history: ExecutionHistory::new(10),
            blocked: Vec::new(),
        };
        let report = RunReport::from_outcome(&outcome);

        let paths = write_run(&RunWriteRequest {
            state_dir: temp.path(),
            report: &report,
            result: &outcome.result,
            history: &outcome.history,
        })
        .expect("write run");

        let raw = fs::read_to_string(&paths.report_path).expect("read report");
        let parsed: serde_json::Value = serde_json::from_str(&raw).expect("parse report");
        assert_eq!(parsed["status"], "completed");
        assert!(paths.ledger_path.is_file());
        assert!(paths.history_path.is_file());
    }
}
