//! Command tool: run a shell command inside the repository.
//!
//! Dangerous patterns are refused before anything is spawned. Output is
//! captured and prefixed with the exit code so agents (QA in particular)
//! can parse results semantically.

use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::ErrorKind;
use crate::services::tools::{Tool, ToolExecution, ToolKind};
use crate::services::verifier::command_is_unsafe;

/// Cap on captured output.
const MAX_OUTPUT_BYTES: usize = 128 * 1024;

pub struct RunCommandTool;

#[async_trait::async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &'static str {
        "run_command"
    }

    fn description(&self) -> &'static str {
        "Run a shell command in the repository root and return exit code, \
         stdout, and stderr. Destructive commands are refused."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to run"
                }
            },
            "required": ["command"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Command
    }

    async fn execute(
        &self,
        args: Value,
        repo_root: &Path,
        cancel: &CancellationToken,
    ) -> ToolExecution {
        let Some(command) = args.get("command").and_then(Value::as_str) else {
            return ToolExecution::fail(
                ErrorKind::ToolFailed,
                "missing required parameter: command",
            );
        };

        if command_is_unsafe(command) {
            return ToolExecution::fail(
                ErrorKind::UnsafeCommand,
                format!("refused dangerous command: {command}"),
            );
        }

        let child = match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(repo_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return ToolExecution::fail(ErrorKind::ToolFailed, format!("spawn failed: {e}"))
            }
        };

        // wait_with_output drains both pipes while waiting; on the cancel
        // branch the dropped child is killed via kill_on_drop.
        let output = tokio::select! {
            output = child.wait_with_output() => match output {
                Ok(output) => output,
                Err(e) => {
                    return ToolExecution::fail(ErrorKind::ToolFailed, format!("wait failed: {e}"))
                }
            },
            () = cancel.cancelled() => {
                return ToolExecution::fail(ErrorKind::Cancelled, "command cancelled");
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let mut text = format!("exit code: {exit_code}\n");
        text.push_str("--- stdout ---\n");
        text.push_str(&truncate_lossy(&output.stdout));
        text.push_str("\n--- stderr ---\n");
        text.push_str(&truncate_lossy(&output.stderr));
        let output = text;

        // Non-zero exit is still a successful tool invocation; the agent
        // interprets the exit code.
        ToolExecution::ok(output, vec![])
    }
}

fn truncate_lossy(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() > MAX_OUTPUT_BYTES {
        let mut end = MAX_OUTPUT_BYTES;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        let mut truncated = text[..end].to_string();
        truncated.push_str("\n[truncated]");
        truncated
    } else {
        text.into_owned()
    }
}

/// Extract the exit code from a run_command result string.
pub fn parse_exit_code(output: &str) -> Option<i32> {
    output
        .lines()
        .next()?
        .strip_prefix("exit code: ")?
        .trim()
        .parse()
        .ok()
}
