//! Oracle backed by an agent CLI (`codex exec` by default).
//!
//! Each call renders the decision point's prompt, writes its output schema,
//! and runs the agent on a blocking thread. Artifacts for call `N` land in
//! `<state_dir>/calls/NNNN-<operation>/`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use minijinja::context;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::types::{Adjustment, TaskDigest, TaskSpec};
use crate::io::config::OracleConfig;
use crate::io::executor::{ExecRequest, Executor, load_validated_output};
use crate::io::prompt::{PromptBuilder, PromptKind};
use crate::oracle::{
    AnalyzeRequest, AssessmentRequest, DecomposeRequest, EvaluationRequest, GoalAnalysis, Oracle,
    OracleError, StrategyRequest, ToolInputRequest, ToolSelectionRequest, parse_adjustments,
};

const ANALYZE_SCHEMA: &str = include_str!("../../schemas/oracle/analyze.schema.json");
const DECOMPOSE_SCHEMA: &str = include_str!("../../schemas/oracle/decompose.schema.json");
const SELECT_TOOLS_SCHEMA: &str = include_str!("../../schemas/oracle/select_tools.schema.json");
const TOOL_INPUT_SCHEMA: &str = include_str!("../../schemas/oracle/tool_input.schema.json");
const EVALUATE_SCHEMA: &str = include_str!("../../schemas/oracle/evaluate.schema.json");
const STRATEGIZE_SCHEMA: &str = include_str!("../../schemas/oracle/strategize.schema.json");
const ASSESS_SCHEMA: &str = include_str!("../../schemas/oracle/assess.schema.json");

fn output_schema(kind: PromptKind) -> &'static str {
    match kind {
        PromptKind::Analyze => ANALYZE_SCHEMA,
        PromptKind::Decompose => DECOMPOSE_SCHEMA,
        PromptKind::SelectTools => SELECT_TOOLS_SCHEMA,
        PromptKind::ToolInput => TOOL_INPUT_SCHEMA,
        PromptKind::Evaluate => EVALUATE_SCHEMA,
        PromptKind::Strategize => STRATEGIZE_SCHEMA,
        PromptKind::Assess => ASSESS_SCHEMA,
    }
}

#[derive(serde::Deserialize)]
struct DecomposeReply {
    tasks: Vec<TaskSpec>,
}

#[derive(serde::Deserialize)]
struct SelectToolsReply {
    tools: Vec<String>,
}

/// Tool input travels as a JSON string so the schema can stay closed.
#[derive(serde::Deserialize)]
struct ToolInputReply {
    input_json: String,
}

impl ToolInputReply {
    fn into_input(self) -> Result<Value, OracleError> {
        let input: Value = serde_json::from_str(&self.input_json)
            .map_err(|err| OracleError::Parse(format!("tool input is not JSON: {err}")))?;
        if !input.is_object() {
            return Err(OracleError::Parse("tool input must be a JSON object".to_string()));
        }
        Ok(input)
    }
}

#[derive(serde::Deserialize)]
struct EvaluateReply {
    confidence: f64,
}

#[derive(serde::Deserialize)]
struct StrategyReply {
    adjustments: Vec<Value>,
}

#[derive(serde::Deserialize)]
struct AssessReply {
    goal_achieved: bool,
}

#[derive(Debug)]
pub struct CodexOracle<E> {
    executor: Arc<E>,
    workdir: PathBuf,
    state_dir: PathBuf,
    prompts: PromptBuilder,
    call_timeout: Duration,
    output_limit_bytes: usize,
    seq: AtomicU64,
}

impl<E: Executor + 'static> CodexOracle<E> {
    pub fn new(executor: E, workdir: &Path, state_dir: &Path, config: &OracleConfig) -> Result<Self> {
        Ok(Self {
            executor: Arc::new(executor),
            workdir: workdir.to_path_buf(),
            state_dir: state_dir.to_path_buf(),
            prompts: PromptBuilder::new(config.prompt_budget_bytes)?,
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
            seq: AtomicU64::new(0),
        })
    }

    #[instrument(skip_all, fields(op = kind.as_str()))]
    async fn call<T: DeserializeOwned>(
        &self,
        kind: PromptKind,
        ctx: minijinja::Value,
    ) -> Result<T, OracleError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let prompt = self
            .prompts
            .build(kind, ctx)
            .map_err(|err| OracleError::Transport(format!("{err:#}")))?;
        let call_dir = self
            .state_dir
            .join("calls")
            .join(format!("{seq:04}-{}", kind.as_str()));
        debug!(call_dir = %call_dir.display(), prompt_bytes = prompt.len(), "oracle call");

        let request = ExecRequest {
            workdir: self.workdir.clone(),
            prompt,
            output_schema_path: call_dir.join("output.schema.json"),
            output_path: call_dir.join("output.json"),
            log_path: call_dir.join("agent.log"),
            timeout: self.call_timeout,
            output_limit_bytes: self.output_limit_bytes,
            stream_path: Some(call_dir.join("events.jsonl")),
        };
        let executor = Arc::clone(&self.executor);
        let schema = output_schema(kind);

        let value = tokio::task::spawn_blocking(move || -> Result<Value, OracleError> {
            prepare_call_dir(&call_dir, &request.prompt, schema)
                .map_err(|err| OracleError::Transport(format!("{err:#}")))?;
            executor
                .exec(&request)
                .map_err(|err| OracleError::Transport(format!("{err:#}")))?;
            load_validated_output(&request).map_err(|err| OracleError::Parse(format!("{err:#}")))
        })
        .await
        .map_err(|err| OracleError::Transport(format!("oracle worker failed: {err}")))??;

        serde_json::from_value(value).map_err(|err| OracleError::Parse(err.to_string()))
    }
}

fn prepare_call_dir(call_dir: &Path, prompt: &str, schema: &str) -> Result<()> {
    fs::create_dir_all(call_dir)
        .with_context(|| format!("create call dir {}", call_dir.display()))?;
    fs::write(call_dir.join("prompt.md"), prompt).context("write prompt")?;
    fs::write(call_dir.join("output.schema.json"), schema).context("write output schema")?;
    Ok(())
}

fn to_json<T: Serialize>(value: &T) -> Result<String, OracleError> {
    serde_json::to_string_pretty(value).map_err(|err| OracleError::Transport(err.to_string()))
}

/// Bullet list of finished tasks, or an empty string when there are none.
fn completed_lines(digests: &[TaskDigest]) -> String {
    digests
        .iter()
        .map(|d| format!("- {}: {} (confidence {:.2})", d.id, d.name, d.confidence))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl<E: Executor + 'static> Oracle for CodexOracle<E> {
    async fn analyze(&self, request: AnalyzeRequest) -> Result<GoalAnalysis, OracleError> {
        self.call(
            PromptKind::Analyze,
            context! { goal => request.goal, context => request.context },
        )
        .await
    }

    async fn decompose(&self, request: DecomposeRequest) -> Result<Vec<TaskSpec>, OracleError> {
        let reply: DecomposeReply = self
            .call(
                PromptKind::Decompose,
                context! {
                    goal => &request.goal.original_goal,
                    goal_json => to_json(&request.goal)?,
                    tools_json => to_json(&request.tools)?,
                },
            )
            .await?;
        Ok(reply.tasks)
    }

    async fn select_tools(
        &self,
        request: ToolSelectionRequest,
    ) -> Result<Vec<String>, OracleError> {
        let reply: SelectToolsReply = self
            .call(
                PromptKind::SelectTools,
                context! {
                    task_json => to_json(&request.task)?,
                    tools_json => to_json(&request.tools)?,
                },
            )
            .await?;
        Ok(reply.tools)
    }

    async fn generate_tool_input(&self, request: ToolInputRequest) -> Result<Value, OracleError> {
        let results_json = if request.prior_results.is_empty() {
            String::new()
        } else {
            to_json(&request.prior_results)?
        };
        let reply: ToolInputReply = self
            .call(
                PromptKind::ToolInput,
                context! {
                    goal => &request.context.goal.original_goal,
                    task_json => to_json(&request.task)?,
                    tool_json => to_json(&request.tool)?,
                    completed => completed_lines(&request.context.completed),
                    results_json => results_json,
                },
            )
            .await?;
        reply.into_input()
    }

    async fn evaluate(&self, request: EvaluationRequest) -> Result<f64, OracleError> {
        let reply: EvaluateReply = self
            .call(
                PromptKind::Evaluate,
                context! {
                    task_json => to_json(&request.task)?,
                    threshold => request.task.success_threshold,
                    results_json => to_json(&request.results)?,
                },
            )
            .await?;
        Ok(reply.confidence)
    }

    async fn strategize(&self, request: StrategyRequest) -> Result<Vec<Adjustment>, OracleError> {
        let recent_json = if request.recent.is_empty() {
            String::new()
        } else {
            to_json(&request.recent)?
        };
        let reply: StrategyReply = self
            .call(
                PromptKind::Strategize,
                context! {
                    goal => &request.goal.original_goal,
                    progress_json => to_json(&request.progress)?,
                    tasks_json => to_json(&request.tasks)?,
                    recent_json => recent_json,
                },
            )
            .await?;
        Ok(parse_adjustments(reply.adjustments))
    }

    async fn assess(&self, request: AssessmentRequest) -> Result<bool, OracleError> {
        let reply: AssessReply = self
            .call(
                PromptKind::Assess,
                context! {
                    goal_json => to_json(&request.goal)?,
                    completed => completed_lines(&request.completed),
                    completion_rate => request.completion_rate,
                },
            )
            .await?;
        Ok(reply.goal_achieved)
    }
}
