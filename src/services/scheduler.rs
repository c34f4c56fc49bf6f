//! DAG scheduler: ready-frontier computation and worker dispatch.
//!
//! Maintains a bounded pool of worker slots. Dispatchable tasks are taken
//! FIFO; a task is ready when every task-level predecessor is completed. At
//! most one task per repository runs at a time unless the declared
//! affected-file sets are disjoint. A task is never dispatched twice: the
//! in-flight set is checked under the same lock that registers the worker.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainResult, ErrorKind};
use crate::domain::models::{Task, TaskStatus};
use crate::domain::ports::{Clock, TaskRepository};
use crate::services::event_bus::EventBus;
use crate::services::task_engine::TaskEngine;
use crate::services::force_fail;

/// Poll period for the dispatch loop, besides explicit wakeups.
const DISPATCH_POLL: Duration = Duration::from_millis(500);

struct Inflight {
    cancel: CancellationToken,
    repo_id: Uuid,
    affected_files: Option<Vec<String>>,
}

pub struct Scheduler {
    tasks: Arc<dyn TaskRepository>,
    engine: Arc<TaskEngine>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    slots: Arc<Semaphore>,
    inflight: Arc<Mutex<HashMap<Uuid, Inflight>>>,
    wakeup: Arc<Notify>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        engine: Arc<TaskEngine>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        worker_slots: usize,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            tasks,
            engine,
            bus,
            clock,
            slots: Arc::new(Semaphore::new(worker_slots)),
            inflight: Arc::new(Mutex::new(HashMap::new())),
            wakeup: Arc::new(Notify::new()),
            shutdown,
        })
    }

    /// Wake the dispatch loop (new task, approval, resume).
    pub fn notify(&self) {
        self.wakeup.notify_one();
    }

    /// Dispatch loop; runs until shutdown.
    pub async fn run(&self) {
        info!("scheduler started");
        loop {
            tokio::select! {
                () = self.wakeup.notified() => {}
                () = tokio::time::sleep(DISPATCH_POLL) => {}
                () = self.shutdown.cancelled() => {
                    info!("scheduler stopping");
                    return;
                }
            }

            if let Err(e) = self.dispatch_ready().await {
                error!(error = %e, "dispatch pass failed");
            }
        }
    }

    /// One dispatch pass over the ready frontier.
    pub async fn dispatch_ready(&self) -> DomainResult<()> {
        let candidates = self.tasks.list_dispatchable().await?;

        for task in candidates {
            {
                let inflight = self.inflight.lock().await;
                if inflight.contains_key(&task.id) {
                    continue;
                }
            }

            match self.frontier_state(&task).await? {
                FrontierState::Blocked => continue,
                FrontierState::DependencyFailed => {
                    force_fail(
                        self.tasks.as_ref(),
                        &self.bus,
                        self.clock.as_ref(),
                        task,
                        ErrorKind::DependencyFailed,
                        "a task this depends on failed",
                    )
                    .await?;
                    continue;
                }
                FrontierState::Ready => {}
            }

            if !self.repo_admits(&task).await {
                debug!(task_id = %task.id, "repository busy, holding task");
                continue;
            }

            let Ok(permit) = self.slots.clone().try_acquire_owned() else {
                // Saturated: leave the rest pending (back-pressure).
                return Ok(());
            };

            self.spawn_worker(task, permit).await;
        }

        Ok(())
    }

    async fn frontier_state(&self, task: &Task) -> DomainResult<FrontierState> {
        // Children driven inline by a parent's worker are never dispatched
        // here; their parent holds the repository.
        for dep in &task.depends_on {
            match self.tasks.get(*dep).await?.map(|t| t.status) {
                Some(TaskStatus::Completed) => {}
                Some(TaskStatus::Failed) | None => return Ok(FrontierState::DependencyFailed),
                Some(_) => return Ok(FrontierState::Blocked),
            }
        }
        Ok(FrontierState::Ready)
    }

    /// Repository exclusivity: admit unless an in-flight task targets the
    /// same repository with an overlapping (or undeclared) file set.
    async fn repo_admits(&self, task: &Task) -> bool {
        let task_files: Option<HashSet<&String>> =
            task.affected_files().map(|files| files.iter().collect());

        let inflight = self.inflight.lock().await;
        for entry in inflight.values() {
            if entry.repo_id != task.repo_id {
                continue;
            }
            let (Some(mine), Some(theirs)) = (&task_files, &entry.affected_files) else {
                return false;
            };
            if theirs.iter().any(|f| mine.contains(f)) {
                return false;
            }
        }
        true
    }

    async fn spawn_worker(&self, task: Task, permit: tokio::sync::OwnedSemaphorePermit) {
        let cancel = self.shutdown.child_token();
        let task_id = task.id;

        {
            let mut inflight = self.inflight.lock().await;
            inflight.insert(
                task_id,
                Inflight {
                    cancel: cancel.clone(),
                    repo_id: task.repo_id,
                    affected_files: task.affected_files().map(<[String]>::to_vec),
                },
            );
        }

        let engine = self.engine.clone();
        let inflight = self.inflight.clone();
        let wakeup = self.wakeup.clone();
        tokio::spawn(async move {
            debug!(%task_id, "worker picked up task");
            if let Err(e) = engine.run(task_id, cancel).await {
                warn!(%task_id, error = %e, "worker finished with error");
            }
            inflight.lock().await.remove(&task_id);
            drop(permit);
            wakeup.notify_one();
        });
    }

    /// Cancel a task and all descendants: in-flight workers are signalled,
    /// and every non-terminal member of the subtree is failed. Descendants
    /// get `parent_cancelled`, the root gets `cancelled`.
    pub async fn cancel_cascade(&self, task_id: Uuid) -> DomainResult<()> {
        let descendants = self.tasks.descendants(task_id).await?;

        {
            let inflight = self.inflight.lock().await;
            if let Some(entry) = inflight.get(&task_id) {
                entry.cancel.cancel();
            }
            for task in &descendants {
                if let Some(entry) = inflight.get(&task.id) {
                    entry.cancel.cancel();
                }
            }
        }

        for task in descendants {
            if !task.is_terminal() {
                force_fail(
                    self.tasks.as_ref(),
                    &self.bus,
                    self.clock.as_ref(),
                    task,
                    ErrorKind::ParentCancelled,
                    "parent cancelled",
                )
                .await?;
            }
        }

        if let Some(task) = self.tasks.get(task_id).await? {
            if !task.is_terminal() {
                force_fail(
                    self.tasks.as_ref(),
                    &self.bus,
                    self.clock.as_ref(),
                    task,
                    ErrorKind::Cancelled,
                    "cancelled",
                )
                .await?;
            }
        }

        Ok(())
    }

    /// Number of currently in-flight workers.
    pub async fn inflight_count(&self) -> usize {
        self.inflight.lock().await.len()
    }
}

enum FrontierState {
    Ready,
    Blocked,
    DependencyFailed,
}
