//! `file` tool: read, write and list files confined to the workdir.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::tools::{Tool, ToolDescriptor, ToolError};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum FileOp {
    Read {
        path: String,
    },
    Write {
        path: String,
        contents: String,
    },
    List {
        #[serde(default = "current_dir")]
        path: String,
    },
}

fn current_dir() -> String {
    ".".to_string()
}

#[derive(Debug, Clone)]
pub struct FileTool {
    descriptor: ToolDescriptor,
    root: PathBuf,
    read_limit_bytes: usize,
}

impl FileTool {
    pub const ID: &'static str = "file";

    pub fn new(root: &Path, read_limit_bytes: usize) -> Self {
        Self {
            descriptor: ToolDescriptor {
                id: Self::ID.to_string(),
                description: "Read, write or list files. Paths are relative to the working \
                              directory; absolute paths and `..` are rejected."
                    .to_string(),
                capabilities: vec!["file_io".to_string()],
                input_schema: json!({
                    "type": "object",
                    "required": ["op"],
                    "properties": {
                        "op": {"enum": ["read", "write", "list"]},
                        "path": {"type": "string"},
                        "contents": {"type": "string"}
                    }
                }),
                output_schema: json!({"type": "object"}),
            },
            root: root.to_path_buf(),
            read_limit_bytes,
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let relative = Path::new(path);
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(ToolError::InvalidInput(format!(
                "path must stay inside the working directory: {path}"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Tool for FileTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    #[instrument(skip_all, fields(tool = "file"))]
    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        let op: FileOp =
            serde_json::from_value(input).map_err(|err| ToolError::InvalidInput(err.to_string()))?;
        match op {
            FileOp::Read { path } => {
                let full = self.resolve(&path)?;
                let bytes = tokio::fs::read(&full)
                    .await
                    .map_err(|err| ToolError::Failed(format!("read {path}: {err}")))?;
                let truncated = bytes.len().saturating_sub(self.read_limit_bytes);
                let kept = &bytes[..bytes.len() - truncated];
                debug!(path = %path, bytes = bytes.len(), truncated, "read file");
                Ok(json!({
                    "path": path,
                    "contents": String::from_utf8_lossy(kept),
                    "truncated_bytes": truncated,
                }))
            }
            FileOp::Write { path, contents } => {
                let full = self.resolve(&path)?;
                if let Some(parent) = full.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|err| ToolError::Failed(format!("create {path}: {err}")))?;
                }
                tokio::fs::write(&full, contents.as_bytes())
                    .await
                    .map_err(|err| ToolError::Failed(format!("write {path}: {err}")))?;
                debug!(path = %path, bytes = contents.len(), "wrote file");
                Ok(json!({"path": path, "bytes_written": contents.len()}))
            }
            FileOp::List { path } => {
                let full = self.resolve(&path)?;
                let mut dir = tokio::fs::read_dir(&full)
                    .await
                    .map_err(|err| ToolError::Failed(format!("list {path}: {err}")))?;
                let mut entries = Vec::new();
                while let Some(entry) = dir
                    .next_entry()
                    .await
                    .map_err(|err| ToolError::Failed(format!("list {path}: {err}")))?
                {
                    let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
                    entries.push((entry.file_name().to_string_lossy().into_owned(), is_dir));
                }
                entries.sort();
                let entries: Vec<Value> = entries
                    .into_iter()
                    .map(|(name, is_dir)| json!({"name": name, "is_dir": is_dir}))
                    .collect();
                Ok(json!({"path": path, "entries": entries}))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_inside_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tool = FileTool::new(temp.path(), 1024);

        tool.execute(json!({"op": "write", "path": "notes/a.txt", "contents": "hello"}))
            .await
            .expect("write");
        let out = tool
            .execute(json!({"op": "read", "path": "notes/a.txt"}))
            .await
            .expect("read");
        assert_eq!(out["contents"], json!("hello"));

        let listing = tool
            .execute(json!({"op": "list", "path": "notes"}))
            .await
            .expect("list");
        assert_eq!(listing["entries"], json!([{"name": "a.txt", "is_dir": false}]));
    }

    #[tokio::test]
    async fn rejects_paths_outside_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tool = FileTool::new(temp.path(), 1024);
        for path in ["../escape.txt", "/etc/passwd", "a/../../b"] {
            let err = tool
                .execute(json!({"op": "read", "path": path}))
                .await
                .unwrap_err();
            assert!(matches!(err, ToolError::InvalidInput(_)), "{path}");
        }
    }

    #[tokio::test]
    async fn read_is_bounded() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("big.txt"), "abcdefghij").expect("write");
        let out = FileTool::new(temp.path(), 4)
            .execute(json!({"op": "read", "path": "big.txt"}))
            .await
            .expect("read");
        assert_eq!(out["contents"], json!("abcd"));
        assert_eq!(out["truncated_bytes"], json!(6));
    }

    #[tokio::test]
    async fn missing_file_is_a_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = FileTool::new(temp.path(), 1024)
            .execute(json!({"op": "read", "path": "nope.txt"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed(_)));
    }
}
