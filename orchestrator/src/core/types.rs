//! Shared types for the goal-execution core.
//!
//! These types are the contracts between the checklist, the task executor and
//! the controller loop. They carry no I/O and serialize to the shapes used in
//! run reports and oracle prompts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Priority assigned when the oracle omits one.
pub const DEFAULT_PRIORITY: i64 = 5;
/// Success threshold assigned when the oracle omits one.
pub const DEFAULT_SUCCESS_THRESHOLD: f64 = 0.8;
/// Per-task iteration budget assigned when the oracle omits one.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
/// Complexity estimate assigned when the oracle omits one.
pub const DEFAULT_COMPLEXITY: u32 = 1;

/// Fold a raw confidence value into `[0, 1]`. `NaN` counts as no confidence.
pub fn clamp_confidence(raw: f64) -> f64 {
    if raw.is_nan() {
        return 0.0;
    }
    raw.clamp(0.0, 1.0)
}

/// Lifecycle of a task: `pending -> in_progress -> {completed | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// A unit of work tracked by the checklist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Informational only; batch selection uses insertion order.
    pub priority: i64,
    /// Ids of tasks that must be `completed` before this one is runnable.
    pub dependencies: Vec<String>,
    pub success_threshold: f64,
    pub estimated_complexity: u32,
    pub requires_iterative_execution: bool,
    pub max_iterations: u32,
    pub required_capabilities: Vec<String>,
    pub status: TaskStatus,
    pub result: Option<TaskResult>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Oracle-produced description of a task. Omitted fields take defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSpec {
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub priority: Option<i64>,
    pub dependencies: Vec<String>,
    pub success_threshold: Option<f64>,
    pub estimated_complexity: Option<u32>,
    pub requires_iterative_execution: Option<bool>,
    pub max_iterations: Option<u32>,
    pub required_capabilities: Vec<String>,
}

impl TaskSpec {
    /// Build a pending task under `id`, applying defaults for omitted fields.
    pub fn into_task(self, id: String) -> Task {
        let name = if self.name.trim().is_empty() {
            id.clone()
        } else {
            self.name
        };
        Task {
            description: self.description.unwrap_or_else(|| name.clone()),
            name,
            id,
            priority: self.priority.unwrap_or(DEFAULT_PRIORITY),
            dependencies: dedup(self.dependencies),
            success_threshold: clamp_confidence(
                self.success_threshold.unwrap_or(DEFAULT_SUCCESS_THRESHOLD),
            ),
            estimated_complexity: self.estimated_complexity.unwrap_or(DEFAULT_COMPLEXITY),
            requires_iterative_execution: self.requires_iterative_execution.unwrap_or(false),
            max_iterations: self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS).max(1),
            required_capabilities: dedup(self.required_capabilities),
            status: TaskStatus::Pending,
            result: None,
            completed_at: None,
        }
    }
}

/// Field-level patch carried by [`Adjustment::Modify`]. Status is not patchable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub priority: Option<i64>,
    pub dependencies: Option<Vec<String>>,
    pub success_threshold: Option<f64>,
    pub estimated_complexity: Option<u32>,
    pub requires_iterative_execution: Option<bool>,
    pub max_iterations: Option<u32>,
    pub required_capabilities: Option<Vec<String>>,
}

impl TaskPatch {
    pub fn apply(&self, task: &mut Task) {
        if let Some(name) = &self.name {
            task.name = name.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(dependencies) = &self.dependencies {
            task.dependencies = dedup(dependencies.clone());
        }
        if let Some(threshold) = self.success_threshold {
            task.success_threshold = clamp_confidence(threshold);
        }
        if let Some(complexity) = self.estimated_complexity {
            task.estimated_complexity = complexity;
        }
        if let Some(iterative) = self.requires_iterative_execution {
            task.requires_iterative_execution = iterative;
        }
        if let Some(max_iterations) = self.max_iterations {
            task.max_iterations = max_iterations.max(1);
        }
        if let Some(capabilities) = &self.required_capabilities {
            task.required_capabilities = dedup(capabilities.clone());
        }
    }
}

/// Checklist mutation proposed by the oracle during reflection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Adjustment {
    Reorder { task_id: String, priority: i64 },
    Modify { task_id: String, patch: TaskPatch },
    Add { task: TaskSpec },
}

/// Outcome of a single tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub tool_name: String,
    pub output: Value,
    pub duration_ms: u64,
    pub confidence: f64,
    pub error: Option<String>,
}

/// Outcome of running a task to completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub confidence: f64,
    pub iterations: u32,
    /// Tool results in call order.
    pub tool_results: Vec<ToolResult>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

impl TaskResult {
    /// Result for a task whose tool selection resolved to nothing.
    pub fn no_suitable_tool() -> Self {
        Self {
            success: false,
            confidence: 0.0,
            iterations: 1,
            tool_results: Vec::new(),
            duration_ms: None,
            error: Some("no suitable tool".to_string()),
        }
    }
}

/// Structured restatement of the user's objective. Opaque to the core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalDefinition {
    pub original_goal: String,
    pub success_criteria: Vec<String>,
    pub constraints: Vec<String>,
    pub expected_outcomes: Vec<String>,
    pub challenges: Vec<String>,
}

/// Short description of a finished task handed to oracle prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDigest {
    pub id: String,
    pub name: String,
    pub confidence: f64,
}

impl TaskDigest {
    pub fn from_task(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            name: task.name.clone(),
            confidence: task.result.as_ref().map_or(0.0, |r| r.confidence),
        }
    }
}

/// Read-only snapshot handed to every task execution within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub goal: GoalDefinition,
    pub completed: Vec<TaskDigest>,
}

/// Counts by status plus `completed / total`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub completion_rate: f64,
}

/// Run-level terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
    NoViableTasks,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::NoViableTasks => "no_viable_tasks",
        }
    }
}

/// One `(task, result, timestamp)` entry of the run ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub task: Task,
    pub result: TaskResult,
    pub recorded_at: DateTime<Utc>,
}

/// Run-level ledger owned by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub goal: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub iterations: u32,
    /// Append-only.
    pub ledger: Vec<LedgerEntry>,
    pub status: RunStatus,
}

impl ExecutionResult {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            started_at: Utc::now(),
            ended_at: None,
            iterations: 0,
            ledger: Vec::new(),
            status: RunStatus::InProgress,
        }
    }

    pub fn record(&mut self, task: Task, result: TaskResult) {
        self.ledger.push(LedgerEntry {
            task,
            result,
            recorded_at: Utc::now(),
        });
    }

    /// The last `n` ledger entries (fewer if the ledger is shorter).
    pub fn recent(&self, n: usize) -> &[LedgerEntry] {
        let start = self.ledger.len().saturating_sub(n);
        &self.ledger[start..]
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
    }
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out
}
