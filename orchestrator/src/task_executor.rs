//! Runs one task against the tool registry.
//!
//! Single-mode tasks make exactly one tool call. Iterative tasks cycle through
//! the selected tools, asking the oracle to score the accumulated results
//! after every call, until the score reaches the task's threshold or the
//! round budget runs out. Tool failures become zero-confidence results; only
//! a failed tool-input generation escapes as an error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::history::ToolInvocation;
use crate::core::types::{ExecutionContext, Task, TaskResult, ToolResult, clamp_confidence};
use crate::oracle::{EvaluationRequest, OracleClient, ToolInputRequest, ToolSelectionRequest};
use crate::tools::{Tool, ToolError, ToolRegistry, reported_confidence};

/// A finished task plus the tool calls it made, for the run history.
#[derive(Debug, Clone)]
pub struct TaskRun {
    pub task_id: String,
    pub result: TaskResult,
    pub invocations: Vec<ToolInvocation>,
}

#[derive(Debug, Clone)]
pub struct TaskExecutor {
    oracle: OracleClient,
    tools: Arc<ToolRegistry>,
    tool_timeout: Option<Duration>,
}

impl TaskExecutor {
    pub fn new(oracle: OracleClient, tools: Arc<ToolRegistry>, tool_timeout: Option<Duration>) -> Self {
        Self {
            oracle,
            tools,
            tool_timeout,
        }
    }

    #[instrument(skip_all, fields(task_id = %task.id, iterative = task.requires_iterative_execution))]
    pub async fn execute(&self, task: &Task, context: &ExecutionContext) -> Result<TaskRun> {
        let started = Instant::now();
        let tools = self.select_tools(task).await;
        let mut invocations = Vec::new();

        let mut result = if tools.is_empty() {
            debug!("no tool resolved for task");
            TaskResult::no_suitable_tool()
        } else if task.requires_iterative_execution {
            self.run_iterative(task, context, &tools, &mut invocations).await?
        } else {
            self.run_single(task, context, &tools[0], &mut invocations).await?
        };
        result.duration_ms = Some(elapsed_ms(started));

        info!(
            success = result.success,
            confidence = result.confidence,
            iterations = result.iterations,
            "task finished"
        );
        Ok(TaskRun {
            task_id: task.id.clone(),
            result,
            invocations,
        })
    }

    /// Oracle-selected tools in the oracle's order; unknown ids are dropped.
    async fn select_tools(&self, task: &Task) -> Vec<Arc<dyn Tool>> {
        let ids = self
            .oracle
            .select_tools(ToolSelectionRequest {
                task: task.clone(),
                tools: self.tools.list_tools(),
            })
            .await;
        ids.iter()
            .filter_map(|id| {
                let tool = self.tools.get(id);
                if tool.is_none() {
                    debug!(tool = %id, "oracle selected unknown tool");
                }
                tool
            })
            .collect()
    }

    async fn run_single(
        &self,
        task: &Task,
        context: &ExecutionContext,
        tool: &Arc<dyn Tool>,
        invocations: &mut Vec<ToolInvocation>,
    ) -> Result<TaskResult> {
        let call = self.invoke(task, context, tool, &[], invocations).await?;
        Ok(TaskResult {
            success: call.success,
            confidence: call.confidence,
            iterations: 1,
            error: call.error.clone(),
            tool_results: vec![call],
            duration_ms: None,
        })
    }

    async fn run_iterative(
        &self,
        task: &Task,
        context: &ExecutionContext,
        tools: &[Arc<dyn Tool>],
        invocations: &mut Vec<ToolInvocation>,
    ) -> Result<TaskResult> {
        let mut results: Vec<ToolResult> = Vec::new();
        let mut confidence = 0.0;
        let mut rounds = 0;

        'rounds: while rounds < task.max_iterations {
            rounds += 1;
            for tool in tools {
                let call = self
                    .invoke(task, context, tool, &results, invocations)
                    .await?;
                results.push(call);
                confidence = self
                    .oracle
                    .evaluate(EvaluationRequest {
                        task: task.clone(),
                        results: results.clone(),
                    })
                    .await;
                debug!(round = rounds, confidence, "evaluated progress");
                if confidence >= task.success_threshold {
                    break 'rounds;
                }
            }
        }

        let success = confidence >= task.success_threshold;
        Ok(TaskResult {
            success,
            confidence,
            iterations: rounds,
            tool_results: results,
            duration_ms: None,
            error: (!success).then(|| {
                format!(
                    "confidence {confidence:.2} below threshold {:.2} after {rounds} iterations",
                    task.success_threshold
                )
            }),
        })
    }

    /// One tool call. Only input generation can fail the caller.
    async fn invoke(
        &self,
        task: &Task,
        context: &ExecutionContext,
        tool: &Arc<dyn Tool>,
        prior_results: &[ToolResult],
        invocations: &mut Vec<ToolInvocation>,
    ) -> Result<ToolResult> {
        let descriptor = tool.descriptor().clone();
        let tool_name = descriptor.id.clone();
        let input = self
            .oracle
            .generate_tool_input(ToolInputRequest {
                task: task.clone(),
                tool: descriptor,
                context: context.clone(),
                prior_results: prior_results.to_vec(),
            })
            .await
            .with_context(|| format!("generate input for tool {tool_name} on task {}", task.id))?;

        let started = Instant::now();
        let outcome = match self.tool_timeout {
            Some(limit) => tokio::time::timeout(limit, tool.execute(input.clone()))
                .await
                .unwrap_or(Err(ToolError::Timeout(limit))),
            None => tool.execute(input.clone()).await,
        };
        let duration_ms = elapsed_ms(started);

        let result = match outcome {
            Ok(output) => ToolResult {
                success: true,
                confidence: clamp_confidence(reported_confidence(&output).unwrap_or(1.0)),
                tool_name: tool_name.clone(),
                output,
                duration_ms,
                error: None,
            },
            Err(err) => {
                debug!(tool = %tool_name, err = %err, "tool call failed");
                ToolResult {
                    success: false,
                    tool_name: tool_name.clone(),
                    output: Value::Null,
                    duration_ms,
                    confidence: 0.0,
                    error: Some(err.to_string()),
                }
            }
        };

        invocations.push(ToolInvocation {
            tool_name,
            task_id: task.id.clone(),
            input,
            output: result.output.clone(),
            success: result.success,
            error: result.error.clone(),
            duration_ms,
            recorded_at: Utc::now(),
        });
        Ok(result)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::OracleError;
    use crate::test_support::{ScriptedOracle, ScriptedTool, goal, task};
    use serde_json::json;

    fn context() -> ExecutionContext {
        ExecutionContext {
            goal: goal(),
            completed: Vec::new(),
        }
    }

    fn executor(oracle: ScriptedOracle, tools: Vec<ScriptedTool>) -> TaskExecutor {
        executor_with_timeout(oracle, tools, None)
    }

    fn executor_with_timeout(
        oracle: ScriptedOracle,
        tools: Vec<ScriptedTool>,
        tool_timeout: Option<Duration>,
    ) -> TaskExecutor {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(Arc::new(tool));
        }
        TaskExecutor::new(
            OracleClient::new(Arc::new(oracle), None),
            Arc::new(registry),
            tool_timeout,
        )
    }

    fn iterative(id: &str, max_iterations: u32) -> Task {
        let mut task = task(id);
        task.requires_iterative_execution = true;
        task.max_iterations = max_iterations;
        task
    }

    #[tokio::test]
    async fn single_mode_uses_reported_confidence() {
        let exec = executor(
            ScriptedOracle::new(),
            vec![ScriptedTool::ok("search", json!({"confidence": 0.4}))],
        );
        let run = exec.execute(&task("t"), &context()).await.expect("run");

        assert!(run.result.success);
        assert_eq!(run.result.confidence, 0.4);
        assert_eq!(run.result.iterations, 1);
        assert_eq!(run.result.tool_results.len(), 1);
        assert_eq!(run.invocations.len(), 1);
        assert!(run.result.duration_ms.is_some());
    }

    #[tokio::test]
    async fn single_mode_defaults_confidence_to_one_and_clamps() {
        let exec = executor(
            ScriptedOracle::new(),
            vec![
                ScriptedTool::ok("plain", json!({"done": true})),
                ScriptedTool::ok("eager", json!({"confidence": 1.4})),
            ],
        );
        let plain = exec
            .execute(&task("a"), &context())
            .await
            .expect("plain");
        assert_eq!(plain.result.confidence, 1.0);

        let exec = executor(
            ScriptedOracle::new().with_tool_selection(&["eager"]),
            vec![ScriptedTool::ok("eager", json!({"confidence": 1.4}))],
        );
        let eager = exec.execute(&task("b"), &context()).await.expect("eager");
        assert_eq!(eager.result.confidence, 1.0);
    }

    #[tokio::test]
    async fn no_resolved_tool_fails_without_calls() {
        let exec = executor(
            ScriptedOracle::new().with_tool_selection(&["missing"]),
            vec![ScriptedTool::ok("search", json!({}))],
        );
        let run = exec.execute(&task("t"), &context()).await.expect("run");

        assert!(!run.result.success);
        assert_eq!(run.result.confidence, 0.0);
        assert_eq!(run.result.iterations, 1);
        assert_eq!(run.result.error.as_deref(), Some("no suitable tool"));
        assert!(run.invocations.is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_are_dropped_from_selection() {
        let exec = executor(
            ScriptedOracle::new().with_tool_selection(&["missing", "search"]),
            vec![ScriptedTool::ok("search", json!({}))],
        );
        let run = exec.execute(&task("t"), &context()).await.expect("run");
        assert!(run.result.success);
        assert_eq!(run.result.tool_results[0].tool_name, "search");
    }

    #[tokio::test]
    async fn iterative_mode_stops_once_threshold_is_met() {
        let exec = executor(
            ScriptedOracle::new().with_confidences(&[0.3, 0.5, 0.85]),
            vec![ScriptedTool::ok("search", json!({}))],
        );
        let run = exec
            .execute(&iterative("t", 10), &context())
            .await
            .expect("run");

        assert!(run.result.success);
        assert_eq!(run.result.iterations, 3);
        assert_eq!(run.result.confidence, 0.85);
        assert_eq!(run.result.tool_results.len(), 3);
        assert!(run.result.error.is_none());
    }

    #[tokio::test]
    async fn iterative_mode_checks_after_every_tool() {
        let exec = executor(
            ScriptedOracle::new()
                .with_tool_selection(&["a", "b", "c"])
                .with_confidences(&[0.2, 0.9]),
            vec![
                ScriptedTool::ok("a", json!({})),
                ScriptedTool::ok("b", json!({})),
                ScriptedTool::ok("c", json!({})),
            ],
        );
        let run = exec
            .execute(&iterative("t", 5), &context())
            .await
            .expect("run");

        assert!(run.result.success);
        assert_eq!(run.result.iterations, 1);
        let names: Vec<&str> = run
            .result
            .tool_results
            .iter()
            .map(|r| r.tool_name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn iterative_mode_fails_when_budget_runs_out() {
        let exec = executor(
            ScriptedOracle::new().with_confidences(&[0.1, 0.2]),
            vec![ScriptedTool::ok("search", json!({}))],
        );
        let run = exec
            .execute(&iterative("t", 2), &context())
            .await
            .expect("run");

        assert!(!run.result.success);
        assert_eq!(run.result.iterations, 2);
        assert_eq!(run.result.confidence, 0.2);
        assert!(run.result.error.is_some());
    }

    #[tokio::test]
    async fn tool_errors_become_failed_results() {
        let exec = executor(
            ScriptedOracle::new(),
            vec![ScriptedTool::failing("search", "connection refused")],
        );
        let run = exec.execute(&task("t"), &context()).await.expect("run");

        assert!(!run.result.success);
        assert_eq!(run.result.confidence, 0.0);
        let call = &run.result.tool_results[0];
        assert!(!call.success);
        assert_eq!(call.error.as_deref(), Some("connection refused"));
        assert!(!run.invocations[0].success);
    }

    #[tokio::test]
    async fn slow_tools_time_out() {
        let exec = executor_with_timeout(
            ScriptedOracle::new(),
            vec![ScriptedTool::ok("slow", json!({})).with_delay(Duration::from_millis(500))],
            Some(Duration::from_millis(20)),
        );
        let run = exec.execute(&task("t"), &context()).await.expect("run");
        assert!(!run.result.success);
        assert!(
            run.result
                .error
                .as_deref()
                .is_some_and(|e| e.contains("timed out"))
        );
    }

    #[tokio::test]
    async fn input_generation_failure_propagates() {
        let exec = executor(
            ScriptedOracle::new().failing_tool_input(),
            vec![ScriptedTool::ok("search", json!({}))],
        );
        let err = exec.execute(&task("t"), &context()).await.unwrap_err();
        assert!(err.downcast_ref::<OracleError>().is_some());
    }
}
