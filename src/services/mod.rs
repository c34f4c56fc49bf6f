//! Orchestration kernel services.

pub mod agent_runtime;
pub mod event_bus;
pub mod lease_sweeper;
pub mod prompts;
pub mod repo_scan;
pub mod scheduler;
pub mod task_engine;
pub mod tools;
pub mod verifier;

use crate::domain::errors::{DomainResult, ErrorKind};
use crate::domain::models::{Task, TaskEventPayload, TaskStatus};
use crate::domain::ports::{Clock, TaskRepository};

pub use agent_runtime::AgentRuntime;
pub use event_bus::EventBus;
pub use lease_sweeper::LeaseSweeper;
pub use scheduler::Scheduler;
pub use task_engine::TaskEngine;
pub use verifier::RealityVerifier;

/// Fail a task from outside its worker (lease reclaim, cancel cascade,
/// dependency cascade), publishing the status and error events. Returns
/// false when the task reached a terminal state first.
pub(crate) async fn force_fail(
    tasks: &dyn TaskRepository,
    bus: &EventBus,
    clock: &dyn Clock,
    mut task: Task,
    kind: ErrorKind,
    message: &str,
) -> DomainResult<bool> {
    let expected = task.status;
    if expected.is_terminal() {
        return Ok(false);
    }

    task.fail(kind, message, clock.now());

    if !tasks.update_with_expected_status(&task, expected).await? {
        return Ok(false);
    }

    bus.publish(
        task.id,
        TaskEventPayload::Status {
            from: expected,
            to: TaskStatus::Failed,
        },
    )
    .await?;
    bus.publish(
        task.id,
        TaskEventPayload::Error {
            kind,
            message: message.to_string(),
        },
    )
    .await?;

    Ok(true)
}
