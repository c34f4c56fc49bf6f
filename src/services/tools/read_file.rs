//! Read tool: return the content of a file.

use serde_json::{json, Value};
use std::path::Path;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::ErrorKind;
use crate::services::tools::{Tool, ToolExecution, ToolKind};
use crate::services::verifier::resolve_repo_path;

/// Cap on returned content, to keep transcripts bounded.
const MAX_BYTES: usize = 256 * 1024;

pub struct ReadFileTool;

#[async_trait::async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read a file and return its content. Large files are truncated."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Repo-relative path of the file to read"
                }
            },
            "required": ["path"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::ReadOnly
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

        match fs::read_to_string(&resolved).await {
            Ok(mut content) => {
                if content.len() > MAX_BYTES {
                    let mut end = MAX_BYTES;
                    while !content.is_char_boundary(end) {
                        end -= 1;
                    }
                    content.truncate(end);
                    content.push_str("\n[truncated]");
                }
                ToolExecution::ok(content, vec![])
            }
            Err(e) => ToolExecution::fail(ErrorKind::ToolFailed, format!("cannot read {path}: {e}")),
        }
    }
}
