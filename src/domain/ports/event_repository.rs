//! Per-task event log port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::TaskEvent;

/// Durable per-task event log, keyed by `(task_id, seq)`.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Append a committed event. Sequence collisions are a caller bug and
    /// surface as a database error.
    async fn append(&self, event: &TaskEvent) -> DomainResult<()>;

    /// Events for a task with `seq > since` (all events when `since` is
    /// None), in sequence order.
    async fn replay(&self, task_id: Uuid, since: Option<u64>) -> DomainResult<Vec<TaskEvent>>;

    /// Highest committed sequence number for a task.
    async fn latest_seq(&self, task_id: Uuid) -> DomainResult<Option<u64>>;
}
