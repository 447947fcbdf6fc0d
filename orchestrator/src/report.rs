//! Final run report: what the CLI prints and writes to `report.json`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::invariants::BlockedTask;
use crate::core::types::{ProgressSummary, RunStatus, TaskStatus};
use crate::exit_codes;
use crate::orchestrate::{RunAborted, RunOutcome};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedTask {
    pub id: String,
    pub name: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub goal: String,
    pub status: RunStatus,
    pub iterations: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Absent for aborted runs, whose checklist is not returned.
    pub progress: Option<ProgressSummary>,
    pub failed_tasks: Vec<FailedTask>,
    pub blocked: Vec<BlockedTask>,
    pub abort_reason: Option<String>,
    pub tool_calls: usize,
}

impl RunReport {
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        let failed_tasks = outcome
            .checklist
            .tasks()
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| FailedTask {
                id: t.id.clone(),
                name: t.name.clone(),
                error: t.result.as_ref().and_then(|r| r.error.clone()),
            })
            .collect();
        Self {
            goal: outcome.result.goal.clone(),
            status: outcome.result.status,
            iterations: outcome.result.iterations,
            started_at: outcome.result.started_at,
            ended_at: outcome.result.ended_at,
            progress: Some(outcome.checklist.progress_summary()),
            failed_tasks,
            blocked: outcome.blocked.clone(),
            abort_reason: None,
            tool_calls: outcome.history.len() + outcome.history.evicted(),
        }
    }

    pub fn from_abort(aborted: &RunAborted) -> Self {
        let result = &aborted.result;
        let failed_tasks = result
            .ledger
            .iter()
            .filter(|e| !e.result.success)
            .map(|e| FailedTask {
                id: e.task.id.clone(),
                name: e.task.name.clone(),
                error: e.result.error.clone(),
            })
            .collect();
        Self {
            goal: result.goal.clone(),
            status: result.status,
            iterations: result.iterations,
            started_at: result.started_at,
            ended_at: result.ended_at,
            progress: None,
            failed_tasks,
            blocked: Vec::new(),
            abort_reason: Some(aborted.reason.clone()),
            tool_calls: aborted.history.len() + aborted.history.evicted(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Completed => exit_codes::OK,
            RunStatus::InProgress => exit_codes::INCOMPLETE,
            RunStatus::NoViableTasks => exit_codes::NO_VIABLE_TASKS,
            RunStatus::Failed => exit_codes::ABORTED,
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "goal: {}", self.goal)?;
        writeln!(
            f,
            "status: {} after {} iteration(s)",
            self.status.as_str(),
            self.iterations
        )?;
        if let Some(progress) = &self.progress {
            writeln!(
                f,
                "tasks: {} total, {} completed, {} failed, {} pending ({:.0}% complete)",
                progress.total,
                progress.completed,
                progress.failed,
                progress.pending,
                progress.completion_rate * 100.0
            )?;
        }
        if let Some(reason) = &self.abort_reason {
            writeln!(f, "aborted: {reason}")?;
        }
        if !self.failed_tasks.is_empty() {
            writeln!(f, "failed tasks:")?;
            for task in &self.failed_tasks {
                let error = task.error.as_deref().unwrap_or("no error recorded");
                writeln!(f, "- {} ({}): {}", task.name, task.id, error)?;
            }
        }
        if !self.blocked.is_empty() {
            writeln!(f, "blocked tasks:")?;
            for stuck in &self.blocked {
                writeln!(f, "- {}: {:?}", stuck.task_id, stuck.reason)?;
            }
        }
        Ok(())
    }
}
