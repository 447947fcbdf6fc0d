//! Adaptive controller: drives a goal from analysis to a terminal status.
//!
//! Each iteration asks the oracle whether the goal is met, dispatches the
//! first `batch_size` runnable tasks through the coordinator, folds the
//! results back in submission order, and reflects when the recent ledger
//! fails too often. Only this loop mutates the checklist and the history.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::coordinator::Coordinator;
use crate::core::checklist::Checklist;
use crate::core::history::ExecutionHistory;
use crate::core::invariants::{BlockedTask, diagnose_blocked, validate_dependencies};
use crate::core::reflection::{ReflectionPolicy, should_reflect};
use crate::core::selector::select_batch;
use crate::core::types::{
    ExecutionContext, ExecutionResult, RunStatus, Task, TaskDigest, TaskResult,
};
use crate::io::config::OrchestratorConfig;
use crate::oracle::{
    AnalyzeRequest, AssessmentRequest, DecomposeRequest, Oracle, OracleClient, StrategyRequest,
    TaskOverview,
};
use crate::task_executor::TaskExecutor;
use crate::tools::ToolRegistry;

/// A run stopped by a hard failure. `result.status` is `failed`.
///
/// `history` keeps every tool call made before the abort, including those of
/// the batch that failed.
#[derive(Debug, thiserror::Error)]
#[error("run aborted: {reason}")]
pub struct RunAborted {
    pub result: ExecutionResult,
    pub history: ExecutionHistory,
    pub reason: String,
}

/// Everything a finished run leaves behind.
#[derive(Debug)]
pub struct RunOutcome {
    pub result: ExecutionResult,
    pub checklist: Checklist,
    pub history: ExecutionHistory,
    /// Pending tasks that can never run, with the reason.
    pub blocked: Vec<BlockedTask>,
}

#[derive(Debug)]
pub struct Orchestrator {
    oracle: OracleClient,
    tools: Arc<ToolRegistry>,
    executor: TaskExecutor,
    coordinator: Coordinator,
    max_iterations: u32,
    batch_size: usize,
    reflection: ReflectionPolicy,
    history_limit: usize,
}

impl Orchestrator {
    pub fn new(oracle: Arc<dyn Oracle>, tools: ToolRegistry, config: &OrchestratorConfig) -> Self {
        let oracle = OracleClient::new(oracle, config.oracle_timeout());
        let tools = Arc::new(tools);
        Self {
            executor: TaskExecutor::new(oracle.clone(), Arc::clone(&tools), config.tool_timeout()),
            coordinator: Coordinator::new(config.concurrency_limit()),
            oracle,
            tools,
            max_iterations: config.max_iterations,
            batch_size: config.batch_size.max(1),
            reflection: config.reflection_policy(),
            history_limit: config.history_limit,
        }
    }

    /// Analyze and decompose `goal`, then drive the resulting checklist.
    #[instrument(skip_all, fields(goal = %goal))]
    pub async fn run(&self, goal: &str) -> Result<RunOutcome, RunAborted> {
        let result = ExecutionResult::new(goal);

        let definition = match self
            .oracle
            .analyze(AnalyzeRequest {
                goal: goal.to_string(),
                context: None,
            })
            .await
        {
            Ok(definition) => definition,
            Err(err) => {
                let reason = format!("goal analysis failed: {err}");
                return Err(self.abort_before_tasks(result, reason));
            }
        };

        let specs = match self
            .oracle
            .decompose(DecomposeRequest {
                goal: definition.clone(),
                tools: self.tools.list_tools(),
            })
            .await
        {
            Ok(specs) => specs,
            Err(err) => {
                let reason = format!("goal decomposition failed: {err}");
                return Err(self.abort_before_tasks(result, reason));
            }
        };
        info!(tasks = specs.len(), "goal decomposed");

        self.drive(Checklist::from_specs(definition, specs), result).await
    }

    /// Drive an already-built checklist, skipping analysis and decomposition.
    #[instrument(skip_all, fields(goal = %checklist.goal().original_goal))]
    pub async fn run_checklist(&self, checklist: Checklist) -> Result<RunOutcome, RunAborted> {
        let result = ExecutionResult::new(checklist.goal().original_goal.clone());
        self.drive(checklist, result).await
    }

    fn abort_before_tasks(&self, result: ExecutionResult, reason: String) -> RunAborted {
        abort(result, ExecutionHistory::new(self.history_limit), reason)
    }

    async fn drive(
        &self,
        mut checklist: Checklist,
        mut result: ExecutionResult,
    ) -> Result<RunOutcome, RunAborted> {
        for problem in validate_dependencies(checklist.tasks()) {
            warn!(problem = %problem, "dependency problem");
        }
        let mut history = ExecutionHistory::new(self.history_limit);

        while result.iterations < self.max_iterations {
            let progress = checklist.progress_summary();
            let achieved = self
                .oracle
                .assess(AssessmentRequest {
                    goal: checklist.goal().clone(),
                    completed: completed_digests(&checklist),
                    completion_rate: progress.completion_rate,
                })
                .await;
            if achieved {
                info!(iteration = result.iterations, "goal achieved");
                result.finish(RunStatus::Completed);
                break;
            }

            let batch = select_batch(checklist.available_tasks(), self.batch_size);
            if batch.is_empty() {
                warn!(
                    iteration = result.iterations,
                    pending = progress.pending,
                    "no runnable tasks left"
                );
                result.finish(RunStatus::NoViableTasks);
                break;
            }

            for task in &batch {
                checklist.mark_in_progress(&task.id);
            }
            let context = ExecutionContext {
                goal: checklist.goal().clone(),
                completed: completed_digests(&checklist),
            };
            info!(
                iteration = result.iterations + 1,
                tasks = batch.len(),
                "dispatching batch"
            );

            let executor = &self.executor;
            let context = &context;
            let runs = self
                .coordinator
                .run_batch(batch.clone(), move |task: Task| async move {
                    executor.execute(&task, context).await
                })
                .await;

            // Fold every result before acting on a failure so no task is
            // left in progress.
            let mut abort_reason = None;
            for (task, run) in batch.into_iter().zip(runs) {
                let task_result = match run {
                    Ok(run) => {
                        history.extend(run.invocations);
                        run.result
                    }
                    Err(err) => {
                        let reason = format!("task {} aborted: {err:#}", task.id);
                        let failed = TaskResult {
                            success: false,
                            confidence: 0.0,
                            iterations: 0,
                            tool_results: Vec::new(),
                            duration_ms: None,
                            error: Some(reason.clone()),
                        };
                        abort_reason.get_or_insert(reason);
                        failed
                    }
                };
                checklist.record_result(&task.id, task_result.clone());
                let snapshot = checklist.get(&task.id).cloned().unwrap_or(task);
                result.record(snapshot, task_result);
            }
            if let Some(reason) = abort_reason {
                return Err(abort(result, history, reason));
            }

            if should_reflect(&result.ledger, &self.reflection) {
                let adjustments = self
                    .oracle
                    .strategize(StrategyRequest {
                        goal: checklist.goal().clone(),
                        recent: result.recent(self.reflection.window).to_vec(),
                        progress: checklist.progress_summary(),
                        tasks: checklist.tasks().iter().map(TaskOverview::from_task).collect(),
                    })
                    .await;
                let proposed = adjustments.len();
                let applied = checklist.apply_adjustments(adjustments);
                info!(proposed, applied, "reflection adjusted checklist");
            }

            result.iterations += 1;
        }

        if result.ended_at.is_none() {
            warn!(
                max_iterations = self.max_iterations,
                "iteration limit reached before the goal was met"
            );
            result.ended_at = Some(Utc::now());
        }

        let blocked = diagnose_blocked(checklist.tasks());
        if result.status == RunStatus::NoViableTasks {
            for stuck in &blocked {
                warn!(task_id = %stuck.task_id, reason = ?stuck.reason, "task cannot run");
            }
        }

        info!(
            status = result.status.as_str(),
            iterations = result.iterations,
            "run finished"
        );
        Ok(RunOutcome {
            result,
            checklist,
            history,
            blocked,
        })
    }
}

fn completed_digests(checklist: &Checklist) -> Vec<TaskDigest> {
    checklist
        .completed_tasks()
        .into_iter()
        .map(TaskDigest::from_task)
        .collect()
}

fn abort(mut result: ExecutionResult, history: ExecutionHistory, reason: String) -> RunAborted {
    warn!(reason = %reason, "run aborted");
    result.finish(RunStatus::Failed);
    RunAborted {
        result,
        history,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskStatus;
    use crate::test_support::{ScriptedOracle, ScriptedTool, goal, spec, spec_with_deps};
    use serde_json::json;

    fn orchestrator(oracle: ScriptedOracle, tools: Vec<ScriptedTool>) -> Orchestrator {
        orchestrator_with(oracle, tools, OrchestratorConfig::default())
    }

    fn orchestrator_with(
        oracle: ScriptedOracle,
        tools: Vec<ScriptedTool>,
        config: OrchestratorConfig,
    ) -> Orchestrator {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(Arc::new(tool));
        }
        Orchestrator::new(Arc::new(oracle), registry, &config)
    }

    #[tokio::test]
    async fn runs_decomposed_tasks_until_assessed_complete() {
        let oracle = ScriptedOracle::new()
            .with_tasks(vec![spec("a"), spec_with_deps("b", &["a"])])
            .with_assessments(&[false, false, true]);
        let orch = orchestrator(oracle, vec![ScriptedTool::ok("search", json!({}))]);

        let outcome = orch.run("Ship it").await.expect("run");

        assert_eq!(outcome.result.status, RunStatus::Completed);
        assert_eq!(outcome.result.iterations, 2);
        assert_eq!(outcome.result.ledger.len(), 2);
        assert_eq!(outcome.result.ledger[0].task.id, "a");
        assert_eq!(outcome.result.ledger[1].task.id, "b");
        assert_eq!(outcome.history.len(), 2);
        assert!(outcome.result.ended_at.is_some());
    }

    #[tokio::test]
    async fn analysis_failure_aborts_before_any_task() {
        let oracle = ScriptedOracle::new().failing_analyze();
        let orch = orchestrator(oracle, Vec::new());

        let aborted = orch.run("Ship it").await.unwrap_err();
        assert_eq!(aborted.result.status, RunStatus::Failed);
        assert!(aborted.reason.contains("goal analysis failed"));
        assert!(aborted.result.ledger.is_empty());
        assert!(aborted.history.is_empty());
    }

    #[tokio::test]
    async fn hard_failure_in_batch_records_siblings_then_aborts() {
        let oracle = ScriptedOracle::new().failing_tool_input_for("b");
        let orch = orchestrator(oracle, vec![ScriptedTool::ok("search", json!({}))]);
        let checklist = Checklist::from_specs(goal(), vec![spec("a"), spec("b"), spec("c")]);

        let aborted = orch.run_checklist(checklist).await.unwrap_err();

        assert_eq!(aborted.result.status, RunStatus::Failed);
        assert!(aborted.reason.contains("task b aborted"));
        let statuses: Vec<(String, TaskStatus)> = aborted
            .result
            .ledger
            .iter()
            .map(|e| (e.task.id.clone(), e.task.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("a".to_string(), TaskStatus::Completed),
                ("b".to_string(), TaskStatus::Failed),
                ("c".to_string(), TaskStatus::Completed),
            ]
        );
        let called_for: Vec<&str> = aborted
            .history
            .entries()
            .map(|call| call.task_id.as_str())
            .collect();
        assert_eq!(called_for, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn abort_keeps_history_of_earlier_batches() {
        let oracle = ScriptedOracle::new().failing_tool_input_for("b");
        let config = OrchestratorConfig {
            batch_size: 1,
            ..OrchestratorConfig::default()
        };
        let orch = orchestrator_with(
            oracle,
            vec![ScriptedTool::ok("search", json!({}))],
            config,
        );
        let checklist = Checklist::from_specs(goal(), vec![spec("a"), spec("b")]);

        let aborted = orch.run_checklist(checklist).await.unwrap_err();

        assert_eq!(aborted.result.iterations, 1);
        assert_eq!(aborted.history.len(), 1);
        let first = aborted.history.entries().next().expect("first call");
        assert_eq!(first.task_id, "a");
        assert!(first.success);
    }

    #[tokio::test]
    async fn iteration_cap_leaves_run_in_progress() {
        let oracle = ScriptedOracle::new();
        let config = OrchestratorConfig {
            max_iterations: 1,
            batch_size: 1,
            ..OrchestratorConfig::default()
        };
        let orch = orchestrator_with(
            oracle,
            vec![ScriptedTool::ok("search", json!({}))],
            config,
        );
        let checklist = Checklist::from_specs(goal(), vec![spec("a"), spec("b")]);

        let outcome = orch.run_checklist(checklist).await.expect("run");
        assert_eq!(outcome.result.status, RunStatus::InProgress);
        assert_eq!(outcome.result.iterations, 1);
        assert!(outcome.result.ended_at.is_some());
    }

    #[tokio::test]
    async fn failed_dependency_is_reported_as_blocker() {
        let oracle = ScriptedOracle::new();
        let orch = orchestrator(oracle, vec![ScriptedTool::failing("search", "boom")]);
        let checklist =
            Checklist::from_specs(goal(), vec![spec("a"), spec_with_deps("b", &["a"])]);

        let outcome = orch.run_checklist(checklist).await.expect("run");
        assert_eq!(outcome.result.status, RunStatus::NoViableTasks);
        assert_eq!(outcome.blocked.len(), 1);
        assert_eq!(outcome.blocked[0].task_id, "b");
    }
}
