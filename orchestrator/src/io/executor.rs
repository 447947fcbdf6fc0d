//! Agent process invocation behind the [`Executor`] trait.
//!
//! The codex-backed oracle renders a prompt, then hands an [`ExecRequest`] to
//! an executor that must leave a JSON reply at `output_path`. Tests swap in
//! executors that write canned replies without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Draft;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::io::process::{CommandOptions, CommandOutput, run_command};

/// Parameters for an executor invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Prompt text fed on stdin.
    pub prompt: String,
    /// JSON Schema constraining the reply.
    pub output_schema_path: PathBuf,
    /// Where the agent must write its reply.
    pub output_path: PathBuf,
    /// Where stdout/stderr of the agent process are logged.
    pub log_path: PathBuf,
    pub timeout: Duration,
    /// Truncate logs beyond this many bytes.
    pub output_limit_bytes: usize,
    /// JSONL event stream, written while the agent runs.
    pub stream_path: Option<PathBuf>,
}

/// Abstraction over agent execution backends.
pub trait Executor: Send + Sync {
    /// Run the agent. Must write the reply to `request.output_path`.
    fn exec(&self, request: &ExecRequest) -> Result<()>;
}

/// Executor that spawns an agent CLI (by default `codex exec`).
#[derive(Debug, Clone)]
pub struct CodexExecutor {
    command: Vec<String>,
}

impl CodexExecutor {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Default for CodexExecutor {
    fn default() -> Self {
        Self::new(vec!["codex".to_string(), "exec".to_string()])
    }
}

impl Executor for CodexExecutor {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs(), streaming = request.stream_path.is_some()))]
    fn exec(&self, request: &ExecRequest) -> Result<()> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("oracle command is empty"))?;
        info!(program = %program, workdir = %request.workdir.display(), "starting agent");

        if !request.output_schema_path.exists() {
            bail!(
                "missing output schema {}",
                request.output_schema_path.display()
            );
        }
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg("--sandbox")
            .arg("read-only")
            .arg("--skip-git-repo-check");
        if request.stream_path.is_some() {
            cmd.arg("--json");
        }
        cmd.arg("--output-schema")
            .arg(&request.output_schema_path)
            .arg("--output-last-message")
            .arg(&request.output_path)
            .arg("-")
            .current_dir(&request.workdir);

        let output = run_command(
            cmd,
            CommandOptions {
                stdin: Some(request.prompt.as_bytes()),
                timeout: request.timeout,
                output_limit_bytes: request.output_limit_bytes,
                stream_path: request.stream_path.as_deref(),
            },
        )
        .with_context(|| format!("run {program}"))?;

        write_exec_log(&request.log_path, &output, request.output_limit_bytes)?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "agent timed out");
            bail!("{program} timed out after {:?}", request.timeout);
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent failed");
            bail!("{program} failed with status {:?}", output.status.code());
        }

        debug!("agent completed successfully");
        Ok(())
    }
}

/// Read the agent reply and check it against the request's output schema.
#[instrument(skip_all, fields(output_path = %request.output_path.display()))]
pub fn load_validated_output(request: &ExecRequest) -> Result<Value> {
    if !request.output_path.exists() {
        bail!("missing agent output {}", request.output_path.display());
    }
    let raw = fs::read_to_string(&request.output_path)
        .with_context(|| format!("read agent output {}", request.output_path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("parse {}", request.output_path.display()))?;
    let schema_raw = fs::read_to_string(&request.output_schema_path).with_context(|| {
        format!("read output schema {}", request.output_schema_path.display())
    })?;
    let schema: Value = serde_json::from_str(&schema_raw).context("parse output schema")?;
    validate_schema(&value, &schema)?;
    Ok(value)
}

/// Validate a JSON instance against a JSON Schema (Draft 2020-12).
pub fn validate_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

fn write_exec_log(path: &Path, output: &CommandOutput, output_limit: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create agent log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&output.stdout_lossy());
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&output.stderr_lossy());
    buf.push_str(&output.truncated_notice("agent"));
    if output.timed_out {
        buf.push_str("\n[agent timed out]\n");
    }

    if buf.len() > output_limit {
        let mut cut = output_limit;
        while !buf.is_char_boundary(cut) {
            cut -= 1;
        }
        let dropped = buf.len() - cut;
        buf.truncate(cut);
        buf.push_str(&format!("\n[truncated {dropped} bytes]\n"));
    }

    fs::write(path, buf).with_context(|| format!("write agent log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(dir: &Path) -> ExecRequest {
        ExecRequest {
            workdir: dir.to_path_buf(),
            prompt: "prompt".to_string(),
            output_schema_path: dir.join("schema.json"),
            output_path: dir.join("output.json"),
            log_path: dir.join("agent.log"),
            timeout: Duration::from_secs(1),
            output_limit_bytes: 1000,
            stream_path: None,
        }
    }

    fn write_schema(path: &Path) {
        let schema = json!({
            "type": "object",
            "required": ["confidence"],
            "properties": {"confidence": {"type": "number"}}
        });
        fs::write(path, schema.to_string()).expect("write schema");
    }

    #[test]
    fn loads_output_that_matches_schema() {
        let temp = tempfile::tempdir().expect("tempdir");
        let request = request(temp.path());
        write_schema(&request.output_schema_path);
        fs::write(&request.output_path, r#"{"confidence": 0.7}"#).expect("write output");

        let value = load_validated_output(&request).expect("load");
        assert_eq!(value["confidence"], json!(0.7));
    }

    #[test]
    fn rejects_output_violating_schema() {
        let temp = tempfile::tempdir().expect("tempdir");
        let request = request(temp.path());
        write_schema(&request.output_schema_path);
        fs::write(&request.output_path, r#"{"confidence": "high"}"#).expect("write output");

        let err = load_validated_output(&request).unwrap_err();
        assert!(err.to_string().contains("schema validation failed"));
    }

    #[test]
    fn errors_on_missing_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let request = request(temp.path());
        let err = load_validated_output(&request).unwrap_err();
        assert!(err.to_string().contains("missing agent output"));
    }

    #[test]
    fn empty_command_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = CodexExecutor::new(Vec::new())
            .exec(&request(temp.path()))
            .unwrap_err();
        assert!(err.to_string().contains("oracle command is empty"));
    }
}
