//! Edit tool: exact string replacement within an existing file.

use serde_json::{json, Value};
use std::path::Path;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::ErrorKind;
use crate::services::tools::{SideEffect, Tool, ToolExecution, ToolKind};
use crate::services::verifier::{content_digest, resolve_repo_path};

pub struct EditFileTool;

#[async_trait::async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &'static str {
        "edit_file"
    }

    fn description(&self) -> &'static str {
        "Replace an exact string in an existing file. The old string must \
         occur exactly once unless replace_all is true."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Repo-relative path of the file to edit"
                },
                "old_string": {
                    "type": "string",
                    "description": "Exact text to replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "Replacement text"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace every occurrence (default false)"
                }
            },
            "required": ["path", "old_string", "new_string"]
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
        let Some(old_string) = args.get("old_string").and_then(Value::as_str) else {
            return ToolExecution::fail(
                ErrorKind::ToolFailed,
                "missing required parameter: old_string",
            );
        };
        let Some(new_string) = args.get("new_string").and_then(Value::as_str) else {
            return ToolExecution::fail(
                ErrorKind::ToolFailed,
                "missing required parameter: new_string",
            );
        };
        let replace_all = args
            .get("replace_all")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let resolved = match resolve_repo_path(repo_root, path) {
            Ok(resolved) => resolved,
            Err(detail) => return ToolExecution::fail(ErrorKind::PathEscape, detail),
        };

        let content = match fs::read_to_string(&resolved).await {
            Ok(content) => content,
            Err(e) => {
                return ToolExecution::fail(ErrorKind::ToolFailed, format!("cannot read {path}: {e}"))
            }
        };

        let occurrences = content.matches(old_string).count();
        if occurrences == 0 {
            return ToolExecution::fail(
                ErrorKind::ToolFailed,
                format!("old_string not found in {path}"),
            );
        }
        if occurrences > 1 && !replace_all {
            return ToolExecution::fail(
                ErrorKind::ToolFailed,
                format!("old_string occurs {occurrences} times in {path}; pass replace_all"),
            );
        }

        let updated = if replace_all {
            content.replace(old_string, new_string)
        } else {
            content.replacen(old_string, new_string, 1)
        };

        let bytes = updated.as_bytes();
        if let Err(e) = fs::write(&resolved, bytes).await {
            return ToolExecution::fail(ErrorKind::ToolFailed, format!("failed to write: {e}"));
        }

        ToolExecution::ok(
            format!("replaced {occurrences} occurrence(s) in {path}"),
            vec![SideEffect::Update {
                path: path.to_string(),
                byte_size: bytes.len() as u64,
                sha256: content_digest(bytes),
            }],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_single_replacement() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("readme.md"), "hello world").unwrap();

        let result = EditFileTool
            .execute(
                json!({ "path": "readme.md", "old_string": "world", "new_string": "foreman" }),
                dir.path(),
                &CancellationToken::new(),
            )
            .await;

        assert!(result.success);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("readme.md")).unwrap(),
            "hello foreman"
        );
        assert!(matches!(result.side_effects[0], SideEffect::Update { .. }));
    }

    #[tokio::test]
    async fn test_ambiguous_without_replace_all() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x x").unwrap();

        let result = EditFileTool
            .execute(
                json!({ "path": "a.txt", "old_string": "x", "new_string": "y" }),
                dir.path(),
                &CancellationToken::new(),
            )
            .await;
        assert!(!result.success);

        let result = EditFileTool
            .execute(
                json!({ "path": "a.txt", "old_string": "x", "new_string": "y", "replace_all": true }),
                dir.path(),
                &CancellationToken::new(),
            )
            .await;
        assert!(result.success);
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "y y");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = EditFileTool
            .execute(
                json!({ "path": "ghost.txt", "old_string": "a", "new_string": "b" }),
                dir.path(),
                &CancellationToken::new(),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().0, ErrorKind::ToolFailed);
    }
}
