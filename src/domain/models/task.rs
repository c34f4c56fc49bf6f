//! Task domain model.
//!
//! A task is one engineering request against a registered repository. It
//! moves through the pipeline plan -> execute -> test -> document, possibly
//! spawning fix children along the way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::ErrorKind;
use crate::domain::models::plan::Plan;

/// Status of a task in the execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, waiting for a worker slot
    Pending,
    /// Planner agent is decomposing the request
    Planning,
    /// Plan produced with low confidence, awaiting human approve/reject
    PlanReview,
    /// Coder agents are working through plan steps
    Executing,
    /// QA agent is running the test suite
    Testing,
    /// Docs agent is updating documentation
    Documenting,
    /// Finished successfully
    Completed,
    /// Finished unsuccessfully
    Failed,
    /// Suspended by an external pause command
    Paused,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::PlanReview => "plan_review",
            Self::Executing => "executing",
            Self::Testing => "testing",
            Self::Documenting => "documenting",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "planning" => Some(Self::Planning),
            "plan_review" => Some(Self::PlanReview),
            "executing" => Some(Self::Executing),
            "testing" => Some(Self::Testing),
            "documenting" => Some(Self::Documenting),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "paused" => Some(Self::Paused),
        _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// States in which a worker owns the task and must keep its lease alive.
    pub fn is_leased(&self) -> bool {
        matches!(
            self,
            Self::Planning | Self::Executing | Self::Testing | Self::Documenting
        )
    }

    /// Valid transitions from this status.
    ///
    /// `Failed` is reachable from every non-terminal state (cancellation,
    /// lease expiry, cascade); `Paused` from every non-terminal state except
    /// itself.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Planning, Self::Paused, Self::Failed],
            Self::Planning => &[
                Self::Executing,
                Self::PlanReview,
                Self::Paused,
                Self::Failed,
            ],
            Self::PlanReview => &[Self::Executing, Self::Paused, Self::Failed],
            Self::Executing => &[Self::Testing, Self::Paused, Self::Failed],
            Self::Testing => &[
                Self::Executing,
                Self::Documenting,
                Self::Paused,
                Self::Failed,
            ],
            Self::Documenting => &[Self::Completed, Self::Paused, Self::Failed],
            Self::Paused => &[
                Self::Pending,
                Self::Planning,
                Self::PlanReview,
                Self::Executing,
                Self::Testing,
                Self::Documenting,
                Self::Failed,
            ],
            Self::Completed | Self::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of the agent driving the current phase or plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Planner,
    /// Backend coder
    CoderBe,
    /// Frontend coder
    CoderFe,
    /// Infrastructure coder
    CoderInfra,
    Qa,
    Docs,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::CoderBe => "coder_be",
            Self::CoderFe => "coder_fe",
            Self::CoderInfra => "coder_infra",
            Self::Qa => "qa",
            Self::Docs => "docs",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "planner" => Some(Self::Planner),
            "coder_be" | "coder" | "coder_backend" => Some(Self::CoderBe),
            "coder_fe" | "coder_frontend" => Some(Self::CoderFe),
            "coder_infra" => Some(Self::CoderInfra),
            "qa" => Some(Self::Qa),
            "docs" => Some(Self::Docs),
            _ => None,
        }
    }

    pub fn is_coder(&self) -> bool {
        matches!(self, Self::CoderBe | Self::CoderFe | Self::CoderInfra)
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One engineering request against a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: Uuid,
    /// Parent task (fix children and fan-out children)
    pub parent_task_id: Option<Uuid>,
    /// Target repository
    pub repo_id: Uuid,
    /// Free-text engineering request
    pub user_request: String,
    /// Human-readable title
    pub title: String,
    /// Current status
    pub status: TaskStatus,
    /// Status the task held when it was paused (restored on resume)
    pub paused_from: Option<TaskStatus>,
    /// Role driving the current phase
    pub current_role: Option<AgentRole>,
    /// Index of the next plan step to execute
    pub current_step: u32,
    /// Plan, once the planner has run
    pub plan: Option<Plan>,
    /// Task-level predecessors (fan-out children)
    pub depends_on: Vec<Uuid>,
    /// Fix-loop retry counter
    pub retry_count: u32,
    /// Fix-child recursion depth (0 for root tasks)
    pub fix_depth: u32,
    /// Whether the plan requires human review before execution
    pub requires_review: bool,
    /// Human-readable failure description
    pub error_message: Option<String>,
    /// Stable failure classification
    pub error_kind: Option<ErrorKind>,
    /// Last worker heartbeat; None while no worker owns the task
    pub heartbeat_at: Option<DateTime<Utc>>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
    /// When it reached a terminal state successfully
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new root task from a request. Title is auto-generated.
    pub fn new(repo_id: Uuid, request: impl Into<String>, now: DateTime<Utc>) -> Self {
        let user_request = request.into();
        let title = generate_title(&user_request);
        Self {
            id: Uuid::new_v4(),
            parent_task_id: None,
            repo_id,
            user_request,
            title,
            status: TaskStatus::default(),
            paused_from: None,
            current_role: None,
            current_step: 0,
            plan: None,
            depends_on: Vec::new(),
            retry_count: 0,
            fix_depth: 0,
            requires_review: false,
            error_message: None,
            error_kind: None,
            heartbeat_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Create a child task (fix or write-tests) under a parent.
    pub fn child_of(parent: &Task, title: impl Into<String>, request: impl Into<String>, now: DateTime<Utc>) -> Self {
        let mut task = Self::new(parent.repo_id, request, now);
        task.title = title.into();
        task.parent_task_id = Some(parent.id);
        task.fix_depth = parent.fix_depth + 1;
        task
    }

    /// Add a task-level dependency.
    pub fn with_dependency(mut self, task_id: Uuid) -> Self {
        if !self.depends_on.contains(&task_id) && task_id != self.id {
            self.depends_on.push(task_id);
        }
        self
    }

    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Transition to a new status, updating timestamps.
    pub fn transition_to(
        &mut self,
        new_status: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<(), crate::domain::errors::DomainError> {
        if !self.can_transition_to(new_status) {
            return Err(crate::domain::errors::DomainError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
            });
        }

        if new_status == TaskStatus::Paused {
            self.paused_from = Some(self.status);
        }
        self.status = new_status;
        self.updated_at = now;
        if new_status.is_terminal() {
            self.completed_at = Some(now);
            self.heartbeat_at = None;
        }
        Ok(())
    }

    /// Mark the task failed with a classification and message.
    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.error_kind = Some(kind);
        self.error_message = Some(message.into());
        self.updated_at = now;
        self.completed_at = Some(now);
        self.heartbeat_at = None;
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of plan steps, 0 when unplanned.
    pub fn step_count(&self) -> u32 {
        self.plan
            .as_ref()
            .map_or(0, |p| u32::try_from(p.steps.len()).unwrap_or(u32::MAX))
    }

    /// Files the plan declared it will touch. Unplanned tasks report an
    /// unknown (conservatively overlapping) set.
    pub fn affected_files(&self) -> Option<&[String]> {
        self.plan.as_ref().map(|p| p.affected_files.as_slice())
    }

    /// Validate request fields prior to insertion.
    pub fn validate(&self) -> Result<(), String> {
        if self.user_request.trim().is_empty() {
            return Err("Task request cannot be empty".to_string());
        }
        if self.title.is_empty() {
            return Err("Task title cannot be empty".to_string());
        }
        if self.depends_on.contains(&self.id) {
            return Err("Task cannot depend on itself".to_string());
        }
        Ok(())
    }
}

/// Generate a short title from a request string.
/// Takes the first line, truncates at ~80 chars on a word boundary.
fn generate_title(request: &str) -> String {
    let first_line = request.lines().next().unwrap_or(request).trim();
    if first_line.is_empty() {
        return "Untitled task".to_string();
    }
    let max_len = 80;
    if first_line.len() <= max_len {
        return first_line.to_string();
    }
    match first_line[..max_len].rfind(' ') {
        Some(pos) => format!("{}...", &first_line[..pos]),
        None => format!("{}...", &first_line[..max_len]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_task() -> Task {
        Task::new(Uuid::new_v4(), "Add GET /healthz returning 200", Utc::now())
    }

    #[test]
    fn test_task_creation_from_request() {
        let task = make_task();
        assert_eq!(task.title, "Add GET /healthz returning 200");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.current_step, 0);
        assert!(task.plan.is_none());
        assert!(task.heartbeat_at.is_none());
    }

    #[test]
    fn test_generate_title() {
        assert_eq!(generate_title("Short request"), "Short request");
        assert_eq!(generate_title("First line\nSecond line"), "First line");

        let long = "This is a very long request that exceeds eighty characters and must be truncated at a word boundary somewhere";
        let title = generate_title(long);
        assert!(title.len() <= 84);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut task = make_task();
        let now = Utc::now();

        task.transition_to(TaskStatus::Planning, now).unwrap();
        task.transition_to(TaskStatus::Executing, now).unwrap();
        task.transition_to(TaskStatus::Testing, now).unwrap();
        task.transition_to(TaskStatus::Documenting, now).unwrap();
        task.transition_to(TaskStatus::Completed, now).unwrap();

        assert!(task.is_terminal());
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_plan_review_detour() {
        let mut task = make_task();
        let now = Utc::now();

        task.transition_to(TaskStatus::Planning, now).unwrap();
        task.transition_to(TaskStatus::PlanReview, now).unwrap();
        assert!(task.can_transition_to(TaskStatus::Executing));
        assert!(task.can_transition_to(TaskStatus::Failed));
        assert!(!task.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn test_fix_loop_transition() {
        let mut task = make_task();
        let now = Utc::now();

        task.transition_to(TaskStatus::Planning, now).unwrap();
        task.transition_to(TaskStatus::Executing, now).unwrap();
        task.transition_to(TaskStatus::Testing, now).unwrap();
        // Tests failed: back to executing while the fix child runs
        task.transition_to(TaskStatus::Executing, now).unwrap();
        task.transition_to(TaskStatus::Testing, now).unwrap();
        task.transition_to(TaskStatus::Documenting, now).unwrap();
    }

    #[test]
    fn test_pause_records_prior_status() {
        let mut task = make_task();
        let now = Utc::now();

        task.transition_to(TaskStatus::Planning, now).unwrap();
        task.transition_to(TaskStatus::Executing, now).unwrap();
        task.transition_to(TaskStatus::Paused, now).unwrap();
        assert_eq!(task.paused_from, Some(TaskStatus::Executing));

        // Resume restores the recorded status
        task.transition_to(TaskStatus::Executing, now).unwrap();
        assert_eq!(task.status, TaskStatus::Executing);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut task = make_task();
        let now = Utc::now();

        // Pending cannot jump straight to executing or completed
        assert!(task.transition_to(TaskStatus::Executing, now).is_err());
        assert!(task.transition_to(TaskStatus::Completed, now).is_err());

        // Terminal states admit nothing
        task.fail(ErrorKind::Cancelled, "cancelled", now);
        assert!(task.transition_to(TaskStatus::Pending, now).is_err());
        assert!(task.transition_to(TaskStatus::Executing, now).is_err());
    }

    #[test]
    fn test_fail_sets_kind_and_message() {
        let mut task = make_task();
        let now = Utc::now();
        task.fail(ErrorKind::LeaseExpired, "lease expired", now);

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_kind, Some(ErrorKind::LeaseExpired));
        assert_eq!(task.error_message.as_deref(), Some("lease expired"));
        assert!(task.completed_at.is_some());
        assert!(task.heartbeat_at.is_none());
    }

    #[test]
    fn test_leased_states() {
        assert!(TaskStatus::Planning.is_leased());
        assert!(TaskStatus::Executing.is_leased());
        assert!(TaskStatus::Testing.is_leased());
        assert!(TaskStatus::Documenting.is_leased());
        assert!(!TaskStatus::Pending.is_leased());
        assert!(!TaskStatus::PlanReview.is_leased());
        assert!(!TaskStatus::Paused.is_leased());
        assert!(!TaskStatus::Completed.is_leased());
    }

    #[test]
    fn test_child_inherits_repo_and_depth() {
        let parent = make_task();
        let child = Task::child_of(&parent, "Fix: tests failed", "Fix the failing tests", Utc::now());

        assert_eq!(child.parent_task_id, Some(parent.id));
        assert_eq!(child.repo_id, parent.repo_id);
        assert_eq!(child.fix_depth, 1);
        assert_eq!(child.title, "Fix: tests failed");
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Planning,
            TaskStatus::PlanReview,
            TaskStatus::Executing,
            TaskStatus::Testing,
            TaskStatus::Documenting,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Paused,
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_role_round_trip() {
        for role in [
            AgentRole::Planner,
            AgentRole::CoderBe,
            AgentRole::CoderFe,
            AgentRole::CoderInfra,
            AgentRole::Qa,
            AgentRole::Docs,
        ] {
            assert_eq!(AgentRole::from_str(role.as_str()), Some(role));
        }
        assert_eq!(AgentRole::from_str("coder"), Some(AgentRole::CoderBe));
    }
}
