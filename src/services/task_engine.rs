//! Task engine: drives one task through plan -> execute -> test -> document.
//!
//! Every state mutation goes through an expected-status compare-and-swap, so
//! concurrent external commands (pause, delete) always win or lose cleanly.
//! The engine observes external changes at checkpoints: before each phase,
//! before each step, and around every agent invocation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult, ErrorKind};
use crate::domain::models::config::Config;
use crate::domain::models::task::AgentRole;
use crate::domain::models::{AgentRun, Task, TaskEventPayload, TaskStatus};
use crate::domain::ports::{Clock, RepoRepository, RunRepository, TaskRepository};
use crate::services::agent_runtime::{AgentOutcome, AgentRuntime, QaVerdict};
use crate::services::event_bus::EventBus;
use crate::services::prompts;

/// Bounded CAS retries before reporting a conflict.
const TRANSITION_ATTEMPTS: u32 = 3;

pub struct TaskEngine {
    tasks: Arc<dyn TaskRepository>,
    runs: Arc<dyn RunRepository>,
    repos: Arc<dyn RepoRepository>,
    bus: Arc<EventBus>,
    runtime: Arc<AgentRuntime>,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
}

/// Aborts the heartbeat ticker when the engine yields the task.
struct HeartbeatGuard(JoinHandle<()>);

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl TaskEngine {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        runs: Arc<dyn RunRepository>,
        repos: Arc<dyn RepoRepository>,
        bus: Arc<EventBus>,
        runtime: Arc<AgentRuntime>,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            tasks,
            runs,
            repos,
            bus,
            runtime,
            clock,
            config,
        }
    }

    /// Drive a task until it completes, fails, or yields (pause or plan
    /// review). Re-entrant: picks up from whatever status the task holds.
    pub async fn run(&self, task_id: Uuid, cancel: CancellationToken) -> DomainResult<()> {
        let Some(task) = self.tasks.get(task_id).await? else {
            return Ok(());
        };
        if task.is_terminal() {
            return Ok(());
        }

        let Some(repo) = self.repos.get(task.repo_id).await? else {
            let mut task = task;
            self.fail(&mut task, ErrorKind::Internal, "repository not registered")
                .await?;
            return Ok(());
        };
        let repo_root = PathBuf::from(&repo.path);

        let _heartbeat = self.spawn_heartbeat(task_id);
        self.drive(task, &repo_root, &cancel).await
    }

    fn spawn_heartbeat(&self, task_id: Uuid) -> HeartbeatGuard {
        let tasks = self.tasks.clone();
        let clock = self.clock.clone();
        let period = Duration::from_secs(self.config.lease.heartbeat_secs);

        HeartbeatGuard(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = tasks.record_heartbeat(task_id, clock.now()).await {
                    warn!(%task_id, error = %e, "heartbeat write failed");
                }
            }
        }))
    }

    async fn drive(
        &self,
        mut task: Task,
        repo_root: &Path,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        loop {
            // Checkpoint: observe external mutations (pause, delete, lease
            // reclaim) before doing anything else.
            let Some(fresh) = self.tasks.get(task.id).await? else {
                return Ok(());
            };
            task = fresh;

            if cancel.is_cancelled() && !task.is_terminal() {
                self.fail(&mut task, ErrorKind::Cancelled, "cancelled").await?;
                return Ok(());
            }

            match task.status {
                TaskStatus::Pending => {
                    self.transition(&mut task, TaskStatus::Planning, |t| {
                        t.current_role = Some(AgentRole::Planner);
                    })
                    .await?;
                }
                TaskStatus::Planning => self.do_planning(&mut task, repo_root, cancel).await?,
                TaskStatus::Executing => self.do_executing(&mut task, repo_root, cancel).await?,
                TaskStatus::Testing => self.do_testing(&mut task, repo_root, cancel).await?,
                TaskStatus::Documenting => {
                    self.do_documenting(&mut task, repo_root, cancel).await?;
                }
                TaskStatus::PlanReview | TaskStatus::Paused => {
                    // Yield the worker; an external approve/resume re-enqueues.
                    self.tasks.clear_heartbeat(task.id).await?;
                    return Ok(());
                }
                TaskStatus::Completed | TaskStatus::Failed => return Ok(()),
            }

            if task.is_terminal() {
                return Ok(());
            }
        }
    }

    // ------------------------------------------------------------------
    // Phases
    // ------------------------------------------------------------------

    async fn do_planning(
        &self,
        task: &mut Task,
        repo_root: &Path,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        let started = std::time::Instant::now();
        let phase = Duration::from_secs(self.config.timeouts.phase_secs);

        let Ok(mut attempt) = timeout(phase, self.runtime.plan(task, repo_root, cancel)).await
        else {
            self.fail(task, ErrorKind::Timeout, "planning phase timed out")
                .await?;
            return Ok(());
        };

        // One engine-level retry for agent failures.
        if !attempt.0.succeeded() && retryable(&attempt.0) {
            debug!(task_id = %task.id, "retrying planner once");
            let Ok(second) = timeout(phase, self.runtime.plan(task, repo_root, cancel)).await
            else {
                self.fail(task, ErrorKind::Timeout, "planning phase timed out")
                    .await?;
                return Ok(());
            };
            attempt = second;
        }
        let (outcome, plan) = attempt;

        if let Some((kind, detail)) = outcome.failure() {
            let detail = detail.to_string();
            self.append_run(task, AgentRole::Planner, &outcome, started.elapsed())
                .await?;
            self.fail(task, kind, detail).await?;
            return Ok(());
        }

        let Some(plan) = plan else {
            self.append_run(task, AgentRole::Planner, &outcome, started.elapsed())
                .await?;
            self.fail(task, ErrorKind::InvalidOutput, "planner returned no plan")
                .await?;
            return Ok(());
        };

        self.bus
            .publish(
                task.id,
                TaskEventPayload::PlanReady {
                    plan: plan.clone(),
                    confidence: outcome.confidence,
                },
            )
            .await?;
        self.append_run(task, AgentRole::Planner, &outcome, started.elapsed())
            .await?;

        let auto = outcome.confidence >= self.config.thresholds.auto_approve;
        info!(
            task_id = %task.id,
            steps = plan.steps.len(),
            confidence = outcome.confidence,
            auto_approved = auto,
            "plan ready"
        );

        if auto {
            self.transition(task, TaskStatus::Executing, |t| {
                t.plan = Some(plan.clone());
                t.requires_review = false;
                t.current_step = 0;
            })
            .await?;
        } else {
            self.transition(task, TaskStatus::PlanReview, |t| {
                t.plan = Some(plan.clone());
                t.requires_review = true;
                t.current_step = 0;
            })
            .await?;
        }

        Ok(())
    }

    async fn do_executing(
        &self,
        task: &mut Task,
        repo_root: &Path,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        let Some(plan) = task.plan.clone() else {
            self.fail(task, ErrorKind::InvalidPlan, "executing without a plan")
                .await?;
            return Ok(());
        };
        let steps: Vec<_> = plan.ordered_steps().into_iter().cloned().collect();
        let phase = Duration::from_secs(self.config.timeouts.phase_secs);

        while (task.current_step as usize) < steps.len() {
            // Checkpoint before each step.
            let Some(fresh) = self.tasks.get(task.id).await? else {
                return Ok(());
            };
            *task = fresh;
            if task.status != TaskStatus::Executing {
                return Ok(());
            }
            if cancel.is_cancelled() {
                self.fail(task, ErrorKind::Cancelled, "cancelled").await?;
                return Ok(());
            }

            let step = steps[task.current_step as usize].clone();
            let started = std::time::Instant::now();

            let Ok(mut outcome) =
                timeout(phase, self.runtime.execute_step(task, &step, repo_root, cancel)).await
            else {
                self.fail(task, ErrorKind::Timeout, "execute phase timed out")
                    .await?;
                return Ok(());
            };

            if !outcome.succeeded() && retryable(&outcome) {
                debug!(task_id = %task.id, step = step.index, "retrying step once");
                let Ok(second) =
                    timeout(phase, self.runtime.execute_step(task, &step, repo_root, cancel))
                        .await
                else {
                    self.fail(task, ErrorKind::Timeout, "execute phase timed out")
                        .await?;
                    return Ok(());
                };
                outcome = second;
            }

            self.append_run(task, step.role, &outcome, started.elapsed())
                .await?;

            if let Some((kind, detail)) = outcome.failure() {
                let detail = detail.to_string();
                self.fail(task, kind, detail).await?;
                return Ok(());
            }

            let next = task.current_step + 1;
            if !self
                .save(task, |t| {
                    t.current_step = next;
                    t.current_role = Some(step.role);
                })
                .await?
            {
                // Lost a race with an external command; re-observe.
                return Ok(());
            }
        }

        self.transition(task, TaskStatus::Testing, |t| {
            t.current_role = Some(AgentRole::Qa);
        })
        .await?;
        Ok(())
    }

    async fn do_testing(
        &self,
        task: &mut Task,
        repo_root: &Path,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        let started = std::time::Instant::now();
        let phase = Duration::from_secs(self.config.timeouts.phase_secs);

        let Ok(mut attempt) = timeout(phase, self.runtime.run_tests(task, repo_root, cancel)).await
        else {
            self.fail(task, ErrorKind::Timeout, "testing phase timed out")
                .await?;
            return Ok(());
        };

        if !attempt.0.succeeded() && retryable(&attempt.0) {
            debug!(task_id = %task.id, "retrying qa once");
            let Ok(second) = timeout(phase, self.runtime.run_tests(task, repo_root, cancel)).await
            else {
                self.fail(task, ErrorKind::Timeout, "testing phase timed out")
                    .await?;
                return Ok(());
            };
            attempt = second;
        }
        let (outcome, verdict) = attempt;

        self.append_run(task, AgentRole::Qa, &outcome, started.elapsed())
            .await?;

        if let Some((kind, detail)) = outcome.failure() {
            let detail = detail.to_string();
            self.fail(task, kind, detail).await?;
            return Ok(());
        }

        match verdict.unwrap_or(QaVerdict::NoTestsExecuted) {
            QaVerdict::Passed => {
                self.transition(task, TaskStatus::Documenting, |t| {
                    t.current_role = Some(AgentRole::Docs);
                })
                .await?;
            }
            QaVerdict::NoTestsExecuted => {
                if task.retry_count >= self.config.fix_loop.max_test_retries {
                    self.fail(task, ErrorKind::TestsFailed, "no tests were ever collected")
                        .await?;
                    return Ok(());
                }
                if !self.save(task, |t| t.retry_count += 1).await? {
                    return Ok(());
                }
                info!(task_id = %task.id, "no tests executed, spawning write-tests child");
                let title = format!("Write tests for: {}", task.title);
                let request = prompts::write_tests_request(task);
                self.spawn_and_await_child(task, &title, &request, cancel)
                    .await?;
            }
            QaVerdict::Failed { summary } => {
                if task.retry_count >= self.config.fix_loop.max_test_retries {
                    self.fail(task, ErrorKind::TestsFailed, tail_of(&summary))
                        .await?;
                    return Ok(());
                }
                if !self.save(task, |t| t.retry_count += 1).await? {
                    return Ok(());
                }
                info!(
                    task_id = %task.id,
                    retry = task.retry_count,
                    "tests failed, spawning fix child"
                );
                let title = format!("Fix: {}", task.title);
                let request = prompts::fix_request(task, &summary);
                self.spawn_and_await_child(task, &title, &request, cancel)
                    .await?;
            }
        }

        Ok(())
    }

    async fn do_documenting(
        &self,
        task: &mut Task,
        repo_root: &Path,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        let started = std::time::Instant::now();
        let phase = Duration::from_secs(self.config.timeouts.phase_secs);

        let Ok(mut outcome) = timeout(phase, self.runtime.document(task, repo_root, cancel)).await
        else {
            self.fail(task, ErrorKind::Timeout, "documenting phase timed out")
                .await?;
            return Ok(());
        };

        if !outcome.succeeded() && retryable(&outcome) {
            debug!(task_id = %task.id, "retrying docs once");
            let Ok(second) = timeout(phase, self.runtime.document(task, repo_root, cancel)).await
            else {
                self.fail(task, ErrorKind::Timeout, "documenting phase timed out")
                    .await?;
                return Ok(());
            };
            outcome = second;
        }

        self.append_run(task, AgentRole::Docs, &outcome, started.elapsed())
            .await?;

        if let Some((kind, detail)) = outcome.failure() {
            let detail = detail.to_string();
            self.fail(task, kind, detail).await?;
            return Ok(());
        }

        if self
            .transition(task, TaskStatus::Completed, |_| {})
            .await?
        {
            self.bus.publish(task.id, TaskEventPayload::Complete).await?;
            info!(task_id = %task.id, "task completed");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Fix loop
    // ------------------------------------------------------------------

    /// Spawn a child task and drive it inline; merge its result per the
    /// fix-loop policy. The parent sits in `executing` while the child runs.
    async fn spawn_and_await_child(
        &self,
        task: &mut Task,
        title: &str,
        request: &str,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        if task.fix_depth >= self.config.fix_loop.max_depth {
            self.fail(
                task,
                ErrorKind::TestsFailed,
                format!("fix recursion depth {} exhausted", task.fix_depth),
            )
            .await?;
            return Ok(());
        }

        if !self
            .transition(task, TaskStatus::Executing, |_| {})
            .await?
        {
            return Ok(());
        }

        loop {
            let child = Task::child_of(task, title, request, self.clock.now());
            let child_id = child.id;
            self.tasks.insert(&child).await?;
            info!(task_id = %task.id, %child_id, "child task spawned");

            Box::pin(self.run(child_id, cancel.child_token())).await?;

            let child_status = self
                .tasks
                .get(child_id)
                .await?
                .map(|c| c.status)
                .unwrap_or(TaskStatus::Failed);

            // Re-observe the parent; it may have been paused or cancelled
            // while the child ran.
            let Some(fresh) = self.tasks.get(task.id).await? else {
                return Ok(());
            };
            *task = fresh;
            if task.status != TaskStatus::Executing {
                return Ok(());
            }

            if child_status == TaskStatus::Completed {
                // Parent re-enters testing.
                self.transition(task, TaskStatus::Testing, |t| {
                    t.current_role = Some(AgentRole::Qa);
                })
                .await?;
                return Ok(());
            }

            warn!(task_id = %task.id, %child_id, "child task failed");
            if task.retry_count >= self.config.fix_loop.max_test_retries {
                self.fail(task, ErrorKind::TestsFailed, "fix child failed and retry budget exhausted")
                    .await?;
                return Ok(());
            }
            if !self.save(task, |t| t.retry_count += 1).await? {
                return Ok(());
            }
        }
    }

    // ------------------------------------------------------------------
    // Transition plumbing
    // ------------------------------------------------------------------

    /// Compare-and-swap a status transition, publishing the status event.
    /// Returns false when an external mutation won; the caller re-observes.
    async fn transition<F>(
        &self,
        task: &mut Task,
        to: TaskStatus,
        configure: F,
    ) -> DomainResult<bool>
    where
        F: Fn(&mut Task),
    {
        let mut attempts = 0;
        loop {
            let expected = task.status;
            let now = self.clock.now();

            let mut updated = task.clone();
            updated.transition_to(to, now)?;
            updated.heartbeat_at = to.is_leased().then_some(now);
            configure(&mut updated);

            if self.tasks.update_with_expected_status(&updated, expected).await? {
                *task = updated;
                self.bus
                    .publish(
                        task.id,
                        TaskEventPayload::Status {
                            from: expected,
                            to,
                        },
                    )
                    .await?;
                return Ok(true);
            }

            attempts += 1;
            if attempts >= TRANSITION_ATTEMPTS {
                return Err(DomainError::ConcurrencyConflict(task.id));
            }
            let Some(fresh) = self.tasks.get(task.id).await? else {
                return Ok(false);
            };
            if fresh.status != expected {
                *task = fresh;
                return Ok(false);
            }
            *task = fresh;
        }
    }

    /// Persist field changes without a status transition, CAS on status.
    async fn save<F>(&self, task: &mut Task, mutate: F) -> DomainResult<bool>
    where
        F: Fn(&mut Task),
    {
        let expected = task.status;
        let mut updated = task.clone();
        mutate(&mut updated);
        updated.updated_at = self.clock.now();

        if self.tasks.update_with_expected_status(&updated, expected).await? {
            *task = updated;
            return Ok(true);
        }
        if let Some(fresh) = self.tasks.get(task.id).await? {
            *task = fresh;
        }
        Ok(false)
    }

    /// Fail the task, publishing status and error events.
    async fn fail(
        &self,
        task: &mut Task,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> DomainResult<()> {
        let message = message.into();
        let expected = task.status;
        if expected.is_terminal() {
            return Ok(());
        }

        let mut updated = task.clone();
        updated.fail(kind, message.clone(), self.clock.now());

        if self.tasks.update_with_expected_status(&updated, expected).await? {
            *task = updated;
            self.bus
                .publish(
                    task.id,
                    TaskEventPayload::Status {
                        from: expected,
                        to: TaskStatus::Failed,
                    },
                )
                .await?;
            self.bus
                .publish(task.id, TaskEventPayload::Error { kind, message })
                .await?;
            warn!(task_id = %task.id, kind = %kind, "task failed");
        }
        Ok(())
    }

    async fn append_run(
        &self,
        task: &Task,
        role: AgentRole,
        outcome: &AgentOutcome,
        duration: Duration,
    ) -> DomainResult<()> {
        let run = AgentRun {
            id: Uuid::new_v4(),
            task_id: task.id,
            step_index: task.current_step,
            role,
            title: outcome.title.clone(),
            subtitle: outcome.subtitle.clone(),
            reasoning: outcome.reasoning.clone(),
            invocations: outcome.invocations.clone(),
            confidence: outcome.confidence,
            review_required: outcome.review_required,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            created_at: self.clock.now(),
        };

        self.runs.append_run(&run).await?;
        self.bus
            .publish(task.id, TaskEventPayload::AgentLog { run })
            .await?;
        Ok(())
    }
}

/// Whether an agent failure deserves the engine's single per-phase retry.
fn retryable(outcome: &AgentOutcome) -> bool {
    outcome
        .failure()
        .is_some_and(|(kind, _)| kind != ErrorKind::Cancelled)
}

fn tail_of(text: &str) -> String {
    let max = 500;
    if text.len() <= max {
        return text.to_string();
    }
    let start = (text.len() - max..text.len())
        .find(|i| text.is_char_boundary(*i))
        .unwrap_or(0);
    format!("...{}", &text[start..])
}
