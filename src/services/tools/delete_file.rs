//! Delete tool: remove a file inside the repository.

use serde_json::{json, Value};
use std::path::Path;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::ErrorKind;
use crate::services::tools::{SideEffect, Tool, ToolExecution, ToolKind};
use crate::services::verifier::resolve_repo_path;

pub struct DeleteFileTool;

#[async_trait::async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &'static str {
        "delete_file"
    }

    fn description(&self) -> &'static str {
        "Delete a single file. Directories cannot be deleted."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Repo-relative path of the file to delete"
                }
            },
            "required": ["path"]
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

        let resolved = match resolve_repo_path(repo_root, path) {
            Ok(resolved) => resolved,
            Err(detail) => return ToolExecution::fail(ErrorKind::PathEscape, detail),
        };

        if resolved.is_dir() {
            return ToolExecution::fail(
                ErrorKind::ToolFailed,
                format!("{path} is a directory"),
            );
        }

        if let Err(e) = fs::remove_file(&resolved).await {
            return ToolExecution::fail(ErrorKind::ToolFailed, format!("failed to delete: {e}"));
        }

        ToolExecution::ok(
            format!("deleted {path}"),
            vec![SideEffect::Delete {
                path: path.to_string(),
            }],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_delete_existing_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("old.txt"), "bye").unwrap();

        let result = DeleteFileTool
            .execute(
                json!({ "path": "old.txt" }),
                dir.path(),
                &CancellationToken::new(),
            )
            .await;

        assert!(result.success);
        assert!(!dir.path().join("old.txt").exists());
        assert_eq!(
            result.side_effects,
            vec![SideEffect::Delete {
                path: "old.txt".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_delete_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let result = DeleteFileTool
            .execute(
                json!({ "path": "ghost.txt" }),
                dir.path(),
                &CancellationToken::new(),
            )
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_delete_directory_refused() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        let result = DeleteFileTool
            .execute(
                json!({ "path": "subdir" }),
                dir.path(),
                &CancellationToken::new(),
            )
            .await;
        assert!(!result.success);
    }
}
