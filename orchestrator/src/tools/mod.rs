//! Capability tools and the registry the task executor selects from.
//!
//! The core only looks at a tool's [`ToolDescriptor`] (for the selection
//! prompt) and calls [`Tool::execute`]. Schemas are advertised to the oracle
//! and never validated here.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod file;
pub mod shell;

/// What a tool advertises about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub id: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub input_schema: Value,
    pub output_schema: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid tool input: {0}")]
    InvalidInput(String),
    #[error("{0}")]
    Failed(String),
    #[error("tool timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    /// Run the tool. An `Err` is recorded as a failed, zero-confidence result.
    async fn execute(&self, input: Value) -> Result<Value, ToolError>;
}

/// In-memory set of tools keyed by id, in registration order.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same id.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        let id = tool.descriptor().id.clone();
        self.tools.retain(|t| t.descriptor().id != id);
        self.tools.push(tool);
        self
    }

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor().clone()).collect()
    }

    pub fn find_by_capability(&self, capability: &str) -> Vec<Arc<dyn Tool>> {
        self.tools
            .iter()
            .filter(|t| t.descriptor().capabilities.iter().any(|c| c == capability))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .iter()
            .find(|t| t.descriptor().id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|t| &t.descriptor().id))
            .finish()
    }
}

/// Registry with the `shell` and `file` tools rooted at `workdir`.
pub fn builtin_registry(
    workdir: &Path,
    default_timeout: Duration,
    output_limit_bytes: usize,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(shell::ShellTool::new(
            workdir,
            default_timeout,
            output_limit_bytes,
        )))
        .register(Arc::new(file::FileTool::new(workdir, output_limit_bytes)));
    registry
}

/// Read the confidence a tool reported in its output, if any.
pub fn reported_confidence(output: &Value) -> Option<f64> {
    output.get("confidence").and_then(Value::as_f64)
}
