//! Task repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Task, TaskStatus};

/// Filter criteria for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub repo_id: Option<Uuid>,
    pub parent_task_id: Option<Uuid>,
    pub status: Option<TaskStatus>,
}

/// Repository interface for Task persistence.
///
/// Per-task operations are serializable; the expected-status update is the
/// compare-and-swap every state transition goes through.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a new task.
    async fn insert(&self, task: &Task) -> DomainResult<()>;

    /// Get a task by ID.
    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>>;

    /// Persist `task` only if the stored status equals `expected`.
    /// Returns false when a concurrent update won.
    async fn update_with_expected_status(
        &self,
        task: &Task,
        expected: TaskStatus,
    ) -> DomainResult<bool>;

    /// Delete a task and cascade to all descendants, runs, and events.
    /// Returns false when the task did not exist.
    async fn delete_cascade(&self, id: Uuid) -> DomainResult<bool>;

    /// List tasks matching the filter, oldest first.
    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>>;

    /// Direct children of a task, oldest first.
    async fn list_children(&self, parent_id: Uuid) -> DomainResult<Vec<Task>>;

    /// All transitive descendants of a task.
    async fn descendants(&self, id: Uuid) -> DomainResult<Vec<Task>>;

    /// Record a worker heartbeat.
    async fn record_heartbeat(&self, id: Uuid, at: DateTime<Utc>) -> DomainResult<()>;

    /// Clear the heartbeat when a worker yields the task cooperatively.
    async fn clear_heartbeat(&self, id: Uuid) -> DomainResult<()>;

    /// Tasks in a leased status whose heartbeat is older than `cutoff`.
    async fn find_expired_leases(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<Task>>;

    /// Tasks eligible for dispatch: pending, or mid-phase with no live
    /// lease (resumed / approved), oldest first.
    async fn list_dispatchable(&self) -> DomainResult<Vec<Task>>;
}
