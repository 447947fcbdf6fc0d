//! `shell` tool: runs a command in the workdir with a timeout and bounded output.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::io::process::{CommandOptions, run_command};
use crate::tools::{Tool, ToolDescriptor, ToolError};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ShellInput {
    /// Program followed by its arguments. No shell interpolation.
    command: Vec<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ShellTool {
    descriptor: ToolDescriptor,
    workdir: PathBuf,
    default_timeout: Duration,
    output_limit_bytes: usize,
}

impl ShellTool {
    pub const ID: &'static str = "shell";
    /// Process limit when neither the call nor the config sets one.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

    pub fn new(workdir: &Path, default_timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            descriptor: ToolDescriptor {
                id: Self::ID.to_string(),
                description: "Run a program with arguments in the working directory. \
                              A non-zero exit status is a failure."
                    .to_string(),
                capabilities: vec!["shell".to_string(), "code_execution".to_string()],
                input_schema: json!({
                    "type": "object",
                    "required": ["command"],
                    "properties": {
                        "command": {"type": "array", "items": {"type": "string"}, "minItems": 1},
                        "timeout_secs": {"type": "integer", "minimum": 1}
                    }
                }),
                output_schema: json!({
                    "type": "object",
                    "properties": {
                        "exit_code": {"type": ["integer", "null"]},
                        "stdout": {"type": "string"},
                        "stderr": {"type": "string"}
                    }
                }),
            },
            workdir: workdir.to_path_buf(),
            default_timeout,
            output_limit_bytes,
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    #[instrument(skip_all, fields(tool = "shell"))]
    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        let input: ShellInput =
            serde_json::from_value(input).map_err(|err| ToolError::InvalidInput(err.to_string()))?;
        let (program, args) = input
            .command
            .split_first()
            .ok_or_else(|| ToolError::InvalidInput("command must not be empty".to_string()))?;
        let timeout = input
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        debug!(program = %program, args = args.len(), "running shell tool");

        let limit = self.output_limit_bytes;
        let output = tokio::task::spawn_blocking(move || {
            run_command(
                cmd,
                CommandOptions {
                    stdin: None,
                    timeout,
                    output_limit_bytes: limit,
                    stream_path: None,
                },
            )
        })
        .await
        .map_err(|err| ToolError::Failed(format!("shell worker failed: {err}")))?
        .map_err(|err| ToolError::Failed(format!("{err:#}")))?;

        if output.timed_out {
            return Err(ToolError::Timeout(timeout));
        }
        let stderr = output.stderr_lossy();
        if !output.status.success() {
            return Err(ToolError::Failed(format!(
                "{program} exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        let mut stdout = output.stdout_lossy();
        stdout.push_str(&output.truncated_notice(Self::ID));
        Ok(json!({
            "exit_code": output.status.code(),
            "stdout": stdout,
            "stderr": stderr,
        }))
    }
}
