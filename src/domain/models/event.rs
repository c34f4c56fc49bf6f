//! Task event envelope and payloads.
//!
//! Every state change a task undergoes is published as exactly one event on
//! the task's topic, with a per-task monotone sequence number. Subscribers
//! are expected to be idempotent keyed on `(task_id, seq)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::ErrorKind;
use crate::domain::models::agent_run::AgentRun;
use crate::domain::models::plan::Plan;
use crate::domain::models::task::TaskStatus;
use crate::domain::models::verified_file::VerifiedFileEvent;

/// Typed payload of a task event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TaskEventPayload {
    /// Status transition
    Status {
        from: TaskStatus,
        to: TaskStatus,
    },
    /// Planner produced a validated plan
    PlanReady {
        plan: Plan,
        confidence: f64,
    },
    /// An agent run finished (success or failure)
    AgentLog {
        run: AgentRun,
    },
    /// The reality verifier confirmed a filesystem effect
    FileVerified {
        event: VerifiedFileEvent,
    },
    /// The task completed successfully
    Complete,
    /// The task failed
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl TaskEventPayload {
    /// Event kind, used as the SSE event name and the persisted kind column.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::PlanReady { .. } => "plan_ready",
            Self::AgentLog { .. } => "agent_log",
            Self::FileVerified { .. } => "file_verified",
            Self::Complete => "complete",
            Self::Error { .. } => "error",
        }
    }
}

/// Envelope delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: Uuid,
    /// Monotone per-task sequence number, starting at 0
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: TaskEventPayload,
}
