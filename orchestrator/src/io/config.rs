//! Orchestrator configuration stored under `.orchestrator/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::reflection::ReflectionPolicy;

/// State directory under the workdir: config, oracle calls and run artifacts.
pub const STATE_DIR: &str = ".orchestrator";

pub fn state_dir(workdir: &Path) -> PathBuf {
    workdir.join(STATE_DIR)
}

pub fn config_path(workdir: &Path) -> PathBuf {
    state_dir(workdir).join("config.toml")
}

/// Orchestrator configuration (TOML).
///
/// Edited by humans; missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Controller iterations before the run stops as incomplete.
    pub max_iterations: u32,

    /// Run batch members concurrently. `false` forces a limit of one.
    pub parallel_execution: bool,

    /// Concurrent units of work; defaults to 3 (parallel) or 1.
    pub max_concurrency: Option<usize>,

    /// Tasks dispatched per iteration.
    pub batch_size: usize,

    /// Ledger entries inspected by the reflection trigger.
    pub reflection_window: usize,

    /// Reflect when the failure fraction in the window is strictly above this.
    pub reflection_failure_threshold: f64,

    /// Tool invocations kept in the run history (oldest evicted first).
    pub history_limit: usize,

    /// Bound on each awaited oracle call.
    pub oracle_timeout_secs: Option<u64>,

    /// Bound on each tool call.
    pub tool_timeout_secs: Option<u64>,

    pub oracle: OracleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    /// Agent command (e.g. `["codex","exec"]`). Prompts are fed on stdin.
    pub command: Vec<String>,

    /// Rendered prompts above this size lose their droppable sections.
    pub prompt_budget_bytes: usize,

    /// Truncate agent stdout/stderr logs beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Agent process wall-clock limit per call.
    pub call_timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            command: vec!["codex".to_string(), "exec".to_string()],
            prompt_budget_bytes: 40_000,
            output_limit_bytes: 100_000,
            call_timeout_secs: 10 * 60,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            parallel_execution: true,
            max_concurrency: None,
            batch_size: 3,
            reflection_window: 5,
            reflection_failure_threshold: 0.6,
            history_limit: 1000,
            oracle_timeout_secs: None,
            tool_timeout_secs: None,
            oracle: OracleConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(anyhow!("batch_size must be > 0"));
        }
        if self.max_concurrency == Some(0) {
            return Err(anyhow!("max_concurrency must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.reflection_failure_threshold) {
            return Err(anyhow!("reflection_failure_threshold must be within [0, 1]"));
        }
        if self.oracle_timeout_secs == Some(0) {
            return Err(anyhow!("oracle_timeout_secs must be > 0"));
        }
        if self.tool_timeout_secs == Some(0) {
            return Err(anyhow!("tool_timeout_secs must be > 0"));
        }
        if self.oracle.command.is_empty() || self.oracle.command[0].trim().is_empty() {
            return Err(anyhow!("oracle.command must be a non-empty array"));
        }
        if self.oracle.prompt_budget_bytes == 0 {
            return Err(anyhow!("oracle.prompt_budget_bytes must be > 0"));
        }
        if self.oracle.output_limit_bytes == 0 {
            return Err(anyhow!("oracle.output_limit_bytes must be > 0"));
        }
        if self.oracle.call_timeout_secs == 0 {
            return Err(anyhow!("oracle.call_timeout_secs must be > 0"));
        }
        Ok(())
    }

    /// Effective coordinator limit.
    pub fn concurrency_limit(&self) -> usize {
        if !self.parallel_execution {
            return 1;
        }
        self.max_concurrency.unwrap_or(3)
    }

    pub fn reflection_policy(&self) -> ReflectionPolicy {
        ReflectionPolicy {
            window: self.reflection_window,
            failure_threshold: self.reflection_failure_threshold,
        }
    }

    pub fn oracle_timeout(&self) -> Option<Duration> {
        self.oracle_timeout_secs.map(Duration::from_secs)
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs.map(Duration::from_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchestratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        let cfg = OrchestratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OrchestratorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
