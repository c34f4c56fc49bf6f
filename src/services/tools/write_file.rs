//! Write tool: create or overwrite a file inside the repository.

use serde_json::{json, Value};
use std::path::Path;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::ErrorKind;
use crate::services::tools::{SideEffect, Tool, ToolExecution, ToolKind};
use crate::services::verifier::{content_digest, resolve_repo_path};

pub struct WriteFileTool;

#[async_trait::async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Write content to a file, creating parent directories as needed. \
         Overwrites the file if it exists. Prefer edit_file for small changes."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Repo-relative path of the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "Full content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::FileOp
    }

    async fn execute(
        &self,
        args: Value,
        repo_root: &Path,
        _cancel: &CancellationToken,
    ) -> ToolExecution {
        let Some(path) = args.get("path").and_then(Value::as_str) else {
            return ToolExecution::fail(ErrorKind::ToolFailed, "missing required parameter: path");
        };
        let Some(content) = args.get("content").and_then(Value::as_str) else {
            return ToolExecution::fail(
                ErrorKind::ToolFailed,
                "missing required parameter: content",
            );
        };

        let resolved = match resolve_repo_path(repo_root, path) {
            Ok(resolved) => resolved,
            Err(detail) => return ToolExecution::fail(ErrorKind::PathEscape, detail),
        };

        let existed = resolved.exists();

        if let Some(parent) = resolved.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                return ToolExecution::fail(
                    ErrorKind::ToolFailed,
                    format!("failed to create directories: {e}"),
                );
            }
        }

        let bytes = content.as_bytes();
        if let Err(e) = fs::write(&resolved, bytes).await {
            return ToolExecution::fail(ErrorKind::ToolFailed, format!("failed to write: {e}"));
        }

        let effect = if existed {
            SideEffect::Update {
                path: path.to_string(),
                byte_size: bytes.len() as u64,
                sha256: content_digest(bytes),
            }
        } else {
            SideEffect::Create {
                path: path.to_string(),
                byte_size: bytes.len() as u64,
                sha256: content_digest(bytes),
            }
        };

        ToolExecution::ok(
            format!("wrote {} bytes to {path}", bytes.len()),
            vec![effect],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_then_update() {
        let dir = TempDir::new().unwrap();
        let tool = WriteFileTool;
        let cancel = CancellationToken::new();

        let result = tool
            .execute(
                json!({ "path": "src/new.rs", "content": "fn a() {}" }),
                dir.path(),
                &cancel,
            )
            .await;
        assert!(result.success);
        assert!(matches!(result.side_effects[0], SideEffect::Create { .. }));
        assert!(dir.path().join("src/new.rs").exists());

        let result = tool
            .execute(
                json!({ "path": "src/new.rs", "content": "fn b() {}" }),
                dir.path(),
                &cancel,
            )
            .await;
        assert!(result.success);
        assert!(matches!(result.side_effects[0], SideEffect::Update { .. }));
    }

    #[tokio::test]
    async fn test_escape_refused() {
        let dir = TempDir::new().unwrap();
        let result = WriteFileTool
            .execute(
                json!({ "path": "../evil.txt", "content": "x" }),
                dir.path(),
                &CancellationToken::new(),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().0, ErrorKind::PathEscape);
    }

    #[tokio::test]
    async fn test_missing_args() {
        let dir = TempDir::new().unwrap();
        let result = WriteFileTool
            .execute(json!({ "path": "a.txt" }), dir.path(), &CancellationToken::new())
            .await;
        assert!(!result.success);
    }
}
