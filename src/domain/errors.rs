//! Domain errors for the Foreman orchestrator.

use thiserror::Error;
use uuid::Uuid;

/// Stable, machine-readable failure classification.
///
/// Persisted on failed tasks as `error_kind` and carried inside tool
/// invocation outcomes so API consumers can branch without parsing
/// human-readable messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // Transient
    RateLimit,
    Network,
    Timeout,
    Conflict,
    // Agent
    InvalidOutput,
    ExceededIterations,
    AgentFailed,
    // Tool
    PathEscape,
    UnsafeCommand,
    RealityMismatch,
    ToolTimeout,
    ToolFailed,
    // Plan
    CyclicPlan,
    InvalidPlan,
    PlanRejected,
    // Lifecycle
    LeaseExpired,
    Cancelled,
    ParentCancelled,
    DependencyFailed,
    TestsFailed,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Conflict => "conflict",
            Self::InvalidOutput => "invalid_output",
            Self::ExceededIterations => "exceeded_iterations",
            Self::AgentFailed => "agent_failed",
            Self::PathEscape => "path_escape",
            Self::UnsafeCommand => "unsafe_command",
            Self::RealityMismatch => "reality_mismatch",
            Self::ToolTimeout => "tool_timeout",
            Self::ToolFailed => "tool_failed",
            Self::CyclicPlan => "cyclic_plan",
            Self::InvalidPlan => "invalid_plan",
            Self::PlanRejected => "plan_rejected",
            Self::LeaseExpired => "lease_expired",
            Self::Cancelled => "cancelled",
            Self::ParentCancelled => "parent_cancelled",
            Self::DependencyFailed => "dependency_failed",
            Self::TestsFailed => "tests_failed",
            Self::Internal => "internal",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "rate_limit" => Some(Self::RateLimit),
            "network" => Some(Self::Network),
            "timeout" => Some(Self::Timeout),
            "conflict" => Some(Self::Conflict),
            "invalid_output" => Some(Self::InvalidOutput),
            "exceeded_iterations" => Some(Self::ExceededIterations),
            "agent_failed" => Some(Self::AgentFailed),
            "path_escape" => Some(Self::PathEscape),
            "unsafe_command" => Some(Self::UnsafeCommand),
            "reality_mismatch" => Some(Self::RealityMismatch),
            "tool_timeout" => Some(Self::ToolTimeout),
            "tool_failed" => Some(Self::ToolFailed),
            "cyclic_plan" => Some(Self::CyclicPlan),
            "invalid_plan" => Some(Self::InvalidPlan),
            "plan_rejected" => Some(Self::PlanRejected),
            "lease_expired" => Some(Self::LeaseExpired),
            "cancelled" => Some(Self::Cancelled),
            "parent_cancelled" => Some(Self::ParentCancelled),
            "dependency_failed" => Some(Self::DependencyFailed),
            "tests_failed" => Some(Self::TestsFailed),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }

    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Network | Self::Timeout | Self::Conflict
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain-level errors.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Repository not found: {0}")]
    RepositoryNotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Concurrency conflict: task {0} was modified")]
    ConcurrencyConflict(Uuid),

    #[error("Plan validation failed ({kind}): {detail}")]
    PlanInvalid { kind: ErrorKind, detail: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Execution failed ({kind}): {detail}")]
    ExecutionFailed { kind: ErrorKind, detail: String },
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Map to the stable kind persisted on failed tasks.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConcurrencyConflict(_) => ErrorKind::Conflict,
            Self::PlanInvalid { kind, .. } | Self::ExecutionFailed { kind, .. } => *kind,
            Self::DatabaseError(_) | Self::SerializationError(_) => ErrorKind::Internal,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
