//! Agent run and tool invocation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::ErrorKind;
use crate::domain::models::task::AgentRole;

/// Outcome of a single tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Ok { result: String },
    Err { kind: ErrorKind, detail: String },
}

impl ToolOutcome {
    pub fn ok(result: impl Into<String>) -> Self {
        Self::Ok {
            result: result.into(),
        }
    }

    pub fn err(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self::Err {
            kind,
            detail: detail.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// Text fed back to the agent as the tool result.
    pub fn feedback(&self) -> String {
        match self {
            Self::Ok { result } => result.clone(),
            Self::Err { kind, detail } => format!("error ({kind}): {detail}"),
        }
    }
}

/// One call by an agent to a named capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: Uuid,
    /// Registered tool name
    pub tool: String,
    /// Arguments as supplied by the agent
    pub args: Value,
    pub outcome: ToolOutcome,
    pub duration_ms: u64,
}

impl ToolInvocation {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// One invocation of a role-specialized agent during a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: Uuid,
    pub task_id: Uuid,
    pub step_index: u32,
    pub role: AgentRole,
    /// User-facing title ("Implemented health endpoint")
    pub title: String,
    /// User-facing subtitle
    pub subtitle: String,
    /// Technical reasoning, opaque (possibly JSON)
    pub reasoning: String,
    /// Tool invocations performed, in order
    pub invocations: Vec<ToolInvocation>,
    /// Self-reported confidence in [0, 1]
    pub confidence: f64,
    /// True when confidence fell below the review threshold
    pub review_required: bool,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl AgentRun {
    /// Repo-relative paths this run successfully wrote or deleted, in order.
    pub fn touched_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        for inv in &self.invocations {
            if !inv.success() {
                continue;
            }
            if let Some(path) = inv.args.get("path").and_then(Value::as_str) {
                if !files.iter().any(|f| f == path) {
                    files.push(path.to_string());
                }
            }
        }
        files
    }
}
