//! Agent-run and verified-file-event persistence port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentRun, VerifiedFileEvent};

/// Append-only store for agent runs and verified file events.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Append an agent run.
    async fn append_run(&self, run: &AgentRun) -> DomainResult<()>;

    /// Runs for a task, ordered by (step, created_at).
    async fn list_runs(&self, task_id: Uuid) -> DomainResult<Vec<AgentRun>>;

    /// Append a verified file event.
    async fn append_file_event(&self, event: &VerifiedFileEvent) -> DomainResult<()>;

    /// Verified file events for a task, in commit order.
    async fn list_file_events(&self, task_id: Uuid) -> DomainResult<Vec<VerifiedFileEvent>>;
}
