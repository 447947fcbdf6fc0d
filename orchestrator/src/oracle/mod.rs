//! The reasoning oracle: every judgment the scheduler cannot make itself.
//!
//! [`Oracle`] has one method per decision point and takes owned, typed
//! requests. Implementations return [`OracleError`] on failure and leave the
//! hard/advisory policy to [`OracleClient`], which is what the executor and
//! controller actually hold.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::core::types::{
    Adjustment, ExecutionContext, GoalDefinition, LedgerEntry, ProgressSummary, Task, TaskDigest,
    TaskSpec, TaskStatus, ToolResult,
};
use crate::tools::ToolDescriptor;

pub mod client;
pub mod codex;

pub use client::OracleClient;
pub use codex::CodexOracle;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    #[error("oracle transport failed: {0}")]
    Transport(String),
    #[error("oracle reply could not be parsed: {0}")]
    Parse(String),
    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzeRequest {
    pub goal: String,
    pub context: Option<String>,
}

/// Oracle reply to [`Oracle::analyze`], before the goal text is attached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoalAnalysis {
    pub success_criteria: Vec<String>,
    pub constraints: Vec<String>,
    pub expected_outcomes: Vec<String>,
    pub challenges: Vec<String>,
}

impl GoalAnalysis {
    pub fn into_definition(self, goal: impl Into<String>) -> GoalDefinition {
        GoalDefinition {
            original_goal: goal.into(),
            success_criteria: self.success_criteria,
            constraints: self.constraints,
            expected_outcomes: self.expected_outcomes,
            challenges: self.challenges,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecomposeRequest {
    pub goal: GoalDefinition,
    pub tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSelectionRequest {
    pub task: Task,
    pub tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInputRequest {
    pub task: Task,
    pub tool: ToolDescriptor,
    pub context: ExecutionContext,
    /// Results of earlier calls for the same task, in call order.
    pub prior_results: Vec<ToolResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationRequest {
    pub task: Task,
    pub results: Vec<ToolResult>,
}

/// Compact view of a task for strategy prompts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOverview {
    pub id: String,
    pub name: String,
    pub status: TaskStatus,
    pub priority: i64,
    pub dependencies: Vec<String>,
}

impl TaskOverview {
    pub fn from_task(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            name: task.name.clone(),
            status: task.status,
            priority: task.priority,
            dependencies: task.dependencies.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyRequest {
    pub goal: GoalDefinition,
    pub recent: Vec<LedgerEntry>,
    pub progress: ProgressSummary,
    pub tasks: Vec<TaskOverview>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssessmentRequest {
    pub goal: GoalDefinition,
    pub completed: Vec<TaskDigest>,
    pub completion_rate: f64,
}

#[async_trait]
pub trait Oracle: Send + Sync {
    async fn analyze(&self, request: AnalyzeRequest) -> Result<GoalAnalysis, OracleError>;

    async fn decompose(&self, request: DecomposeRequest) -> Result<Vec<TaskSpec>, OracleError>;

    /// Ordered tool ids for the task. Unknown ids are dropped by the caller.
    async fn select_tools(&self, request: ToolSelectionRequest)
    -> Result<Vec<String>, OracleError>;

    async fn generate_tool_input(&self, request: ToolInputRequest) -> Result<Value, OracleError>;

    /// Raw confidence; the caller clamps it into `[0, 1]`.
    async fn evaluate(&self, request: EvaluationRequest) -> Result<f64, OracleError>;

    async fn strategize(&self, request: StrategyRequest) -> Result<Vec<Adjustment>, OracleError>;

    async fn assess(&self, request: AssessmentRequest) -> Result<bool, OracleError>;
}

/// Parse adjustments one by one, skipping entries with unknown tags or bad fields.
pub fn parse_adjustments(raw: Vec<Value>) -> Vec<Adjustment> {
    raw.into_iter()
        .filter_map(|value| match serde_json::from_value::<Adjustment>(value.clone()) {
            Ok(adjustment) => Some(adjustment),
            Err(err) => {
                let kind = value.get("type").and_then(Value::as_str).unwrap_or("?");
                warn!(kind, err = %err, "skipping unrecognized adjustment");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_adjustments_skips_unknown_types() {
        let parsed = parse_adjustments(vec![
            json!({"type": "reorder", "task_id": "task-1", "priority": 2}),
            json!({"type": "delete", "task_id": "task-2"}),
            json!({"type": "add", "task": {"name": "Retry download"}}),
            json!({"type": "modify", "patch": {}}),
        ]);

        assert_eq!(parsed.len(), 2);
        assert!(matches!(parsed[0], Adjustment::Reorder { priority: 2, .. }));
        assert!(matches!(&parsed[1], Adjustment::Add { task } if task.name == "Retry download"));
    }

    #[test]
    fn analysis_keeps_original_goal_text() {
        let goal = GoalAnalysis {
            success_criteria: vec!["report exists".to_string()],
            ..GoalAnalysis::default()
        }
        .into_definition("Write the report");
        assert_eq!(goal.original_goal, "Write the report");
        assert_eq!(goal.success_criteria, vec!["report exists".to_string()]);
    }
}
