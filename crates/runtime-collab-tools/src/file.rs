//! A sandboxed file-read tool: relative paths only, rooted at a configured
//! directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::registry::Tool;

/// Reads UTF-8 file contents from beneath `root`. Absolute paths and `..`
/// components are rejected outright rather than silently escaping `root`.
#[derive(Debug, Clone)]
pub struct FileReadTool {
    root: PathBuf,
    max_bytes: u64,
}

#[derive(Debug, Deserialize)]
struct Input {
    path: String,
}

impl FileReadTool {
    /// Read files beneath `root`, capping any single read at `max_bytes`.
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self { root: root.into(), max_bytes }
    }

    fn resolve(&self, requested: &str) -> Result<PathBuf, String> {
        let requested = Path::new(requested);
        if requested.is_absolute() {
            return Err("absolute paths are not allowed".to_string());
        }
        if requested.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err("parent-directory components are not allowed".to_string());
        }
        Ok(self.root.join(requested))
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    async fn call(&self, input: Value) -> Result<Value, String> {
        let input: Input = serde_json::from_value(input).map_err(|e| format!("invalid input: {e}"))?;
        let path = self.resolve(&input.path)?;

        let metadata = tokio::fs::metadata(&path).await.map_err(|e| format!("{}: {e}", input.path))?;
        if metadata.len() > self.max_bytes {
            return Err(format!("{} is {} bytes, over the {} byte limit", input.path, metadata.len(), self.max_bytes));
        }

        let content = tokio::fs::read_to_string(&path).await.map_err(|e| format!("{}: {e}", input.path))?;
        Ok(serde_json::json!({ "path": input.path, "size_bytes": metadata.len(), "content": content }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_a_file_beneath_root() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("note.txt"), "hello").await.unwrap();
        let tool = FileReadTool::new(dir.path(), 1024);

        let result = tool.call(serde_json::json!({"path": "note.txt"})).await.unwrap();
        assert_eq!(result["content"], "hello");
    }

    #[tokio::test]
    async fn rejects_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileReadTool::new(dir.path(), 1024);
        let result = tool.call(serde_json::json!({"path": "/etc/passwd"})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rejects_parent_directory_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileReadTool::new(dir.path(), 1024);
        let result = tool.call(serde_json::json!({"path": "../secret.txt"})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rejects_files_over_the_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("big.txt"), "0123456789").await.unwrap();
        let tool = FileReadTool::new(dir.path(), 4);
        let result = tool.call(serde_json::json!({"path": "big.txt"})).await;
        assert!(result.is_err());
    }
}
