//! List tool: shallow repository scan.

use serde_json::{json, Value};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::ErrorKind;
use crate::services::repo_scan;
use crate::services::tools::{Tool, ToolExecution, ToolKind};
use crate::services::verifier::resolve_repo_path;

pub struct ListFilesTool;

#[async_trait::async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &'static str {
        "list_files"
    }

    fn description(&self) -> &'static str {
        "List files under a directory (repo root by default), one \
         repo-relative path per line. Build artifacts and VCS metadata are \
         skipped."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Repo-relative directory to list (default: repo root)"
                }
            }
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
        let sub = args.get("path").and_then(Value::as_str).unwrap_or("");

        let base = if sub.is_empty() {
            repo_root.to_path_buf()
        } else {
            match resolve_repo_path(repo_root, sub) {
                Ok(resolved) => resolved,
                Err(detail) => return ToolExecution::fail(ErrorKind::PathEscape, detail),
            }
        };

        if !base.is_dir() {
            return ToolExecution::fail(ErrorKind::ToolFailed, format!("not a directory: {sub}"));
        }

        let mut paths = Vec::new();
        repo_scan::collect_files(repo_root, &base, &mut paths);
        paths.sort();

        ToolExecution::ok(paths.join("\n"), vec![])
    }
}
