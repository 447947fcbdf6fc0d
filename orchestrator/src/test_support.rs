//! Test-only builders plus a scripted oracle and scripted tools.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};

use crate::core::types::{
    Adjustment, GoalDefinition, LedgerEntry, Task, TaskResult, TaskSpec,
};
use crate::oracle::{
    AnalyzeRequest, AssessmentRequest, DecomposeRequest, EvaluationRequest, GoalAnalysis, Oracle,
    OracleError, StrategyRequest, ToolInputRequest, ToolSelectionRequest,
};
use crate::tools::{Tool, ToolDescriptor, ToolError};

pub fn goal() -> GoalDefinition {
    GoalDefinition {
        original_goal: "Publish the quarterly report".to_string(),
        success_criteria: vec!["report is published".to_string()],
        ..GoalDefinition::default()
    }
}

/// Spec with an explicit id and otherwise default fields.
pub fn spec(id: &str) -> TaskSpec {
    TaskSpec {
        id: Some(id.to_string()),
        name: format!("{id} name"),
        ..TaskSpec::default()
    }
}

pub fn spec_with_deps(id: &str, deps: &[&str]) -> TaskSpec {
    TaskSpec {
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
        ..spec(id)
    }
}

pub fn task(id: &str) -> Task {
    spec(id).into_task(id.to_string())
}

pub fn task_with_deps(id: &str, deps: &[&str]) -> Task {
    spec_with_deps(id, deps).into_task(id.to_string())
}

pub fn success_result(confidence: f64) -> TaskResult {
    TaskResult {
        success: true,
        confidence,
        iterations: 1,
        tool_results: Vec::new(),
        duration_ms: None,
        error: None,
    }
}

pub fn failed_result(error: &str) -> TaskResult {
    TaskResult {
        success: false,
        confidence: 0.0,
        iterations: 1,
        tool_results: Vec::new(),
        duration_ms: None,
        error: Some(error.to_string()),
    }
}

pub fn ledger_entry(id: &str, result: TaskResult) -> LedgerEntry {
    LedgerEntry {
        task: task(id),
        result,
        recorded_at: Utc::now(),
    }
}

/// Oracle whose answers are queued up front.
///
/// Defaults: analysis lists one criterion, decomposition yields no tasks,
/// every offered tool is selected, tool input is `{}`, evaluation scores 1,
/// strategy proposes nothing and the goal is never achieved.
#[derive(Default)]
pub struct ScriptedOracle {
    tasks: Vec<TaskSpec>,
    tool_selection: Option<Vec<String>>,
    tool_selection_for: HashMap<String, Vec<String>>,
    confidences: Mutex<VecDeque<f64>>,
    adjustments: Mutex<VecDeque<Vec<Adjustment>>>,
    assessments: Mutex<VecDeque<bool>>,
    fail_analyze: bool,
    fail_advisory: bool,
    fail_tool_input_for: Option<HashSet<String>>,
    fail_all_tool_input: bool,
    delay: Option<Duration>,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(mut self, tasks: Vec<TaskSpec>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_tool_selection(mut self, ids: &[&str]) -> Self {
        self.tool_selection = Some(ids.iter().map(|id| id.to_string()).collect());
        self
    }

    /// Selection for one task, taking precedence over [`Self::with_tool_selection`].
    pub fn with_tool_selection_for(mut self, task_id: &str, ids: &[&str]) -> Self {
        self.tool_selection_for.insert(
            task_id.to_string(),
            ids.iter().map(|id| id.to_string()).collect(),
        );
        self
    }

    pub fn with_confidences(self, values: &[f64]) -> Self {
        lock(&self.confidences).extend(values.iter().copied());
        self
    }

    /// Each strategy call takes the next batch of adjustments.
    pub fn with_adjustments(self, adjustments: Vec<Adjustment>) -> Self {
        lock(&self.adjustments).push_back(adjustments);
        self
    }

    pub fn with_assessments(self, answers: &[bool]) -> Self {
        lock(&self.assessments).extend(answers.iter().copied());
        self
    }

    pub fn failing_analyze(mut self) -> Self {
        self.fail_analyze = true;
        self
    }

    /// Tool selection, evaluation, strategy and assessment all fail.
    pub fn failing_advisory(mut self) -> Self {
        self.fail_advisory = true;
        self
    }

    pub fn failing_tool_input(mut self) -> Self {
        self.fail_all_tool_input = true;
        self
    }

    pub fn failing_tool_input_for(mut self, task_id: &str) -> Self {
        self.fail_tool_input_for
            .get_or_insert_with(HashSet::new)
            .insert(task_id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Operation names in call order.
    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        lock(&self.calls).iter().filter(|c| **c == op).count()
    }

    async fn enter(&self, op: &'static str) {
        lock(&self.calls).push(op);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn advisory_failure(&self) -> Result<(), OracleError> {
        if self.fail_advisory {
            return Err(OracleError::Transport("scripted failure".to_string()));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn analyze(&self, _request: AnalyzeRequest) -> Result<GoalAnalysis, OracleError> {
        self.enter("analyze").await;
        if self.fail_analyze {
            return Err(OracleError::Transport("scripted failure".to_string()));
        }
        Ok(GoalAnalysis {
            success_criteria: vec!["done".to_string()],
            ..GoalAnalysis::default()
        })
    }

    async fn decompose(&self, _request: DecomposeRequest) -> Result<Vec<TaskSpec>, OracleError> {
        self.enter("decompose").await;
        Ok(self.tasks.clone())
    }

    async fn select_tools(
        &self,
        request: ToolSelectionRequest,
    ) -> Result<Vec<String>, OracleError> {
        self.enter("select_tools").await;
        self.advisory_failure()?;
        if let Some(ids) = self.tool_selection_for.get(&request.task.id) {
            return Ok(ids.clone());
        }
        Ok(match &self.tool_selection {
            Some(ids) => ids.clone(),
            None => request.tools.into_iter().map(|t| t.id).collect(),
        })
    }

    async fn generate_tool_input(&self, request: ToolInputRequest) -> Result<Value, OracleError> {
        self.enter("generate_tool_input").await;
        let targeted = self
            .fail_tool_input_for
            .as_ref()
            .is_some_and(|ids| ids.contains(&request.task.id));
        if self.fail_all_tool_input || targeted {
            return Err(OracleError::Parse("scripted failure".to_string()));
        }
        Ok(json!({}))
    }

    async fn evaluate(&self, _request: EvaluationRequest) -> Result<f64, OracleError> {
        self.enter("evaluate").await;
        self.advisory_failure()?;
        Ok(lock(&self.confidences).pop_front().unwrap_or(1.0))
    }

    async fn strategize(&self, _request: StrategyRequest) -> Result<Vec<Adjustment>, OracleError> {
        self.enter("strategize").await;
        self.advisory_failure()?;
        Ok(lock(&self.adjustments).pop_front().unwrap_or_default())
    }

    async fn assess(&self, _request: AssessmentRequest) -> Result<bool, OracleError> {
        self.enter("assess").await;
        self.advisory_failure()?;
        Ok(lock(&self.assessments).pop_front().unwrap_or(false))
    }
}

/// Tool that returns a fixed output or error.
pub struct ScriptedTool {
    descriptor: ToolDescriptor,
    outcome: Result<Value, String>,
    delay: Option<Duration>,
}

impl ScriptedTool {
    pub fn ok(id: &str, output: Value) -> Self {
        Self::with_outcome(id, Ok(output))
    }

    pub fn failing(id: &str, message: &str) -> Self {
        Self::with_outcome(id, Err(message.to_string()))
    }

    fn with_outcome(id: &str, outcome: Result<Value, String>) -> Self {
        Self {
            descriptor: ToolDescriptor {
                id: id.to_string(),
                description: format!("{id} tool"),
                capabilities: Vec::new(),
                input_schema: json!({"type": "object"}),
                output_schema: json!({"type": "object"}),
            },
            outcome,
            delay: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.descriptor.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Tool for ScriptedTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _input: Value) -> Result<Value, ToolError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.clone().map_err(ToolError::Failed)
    }
}

