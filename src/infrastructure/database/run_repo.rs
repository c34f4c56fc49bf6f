//! SQLite implementation of the agent-run / verified-file-event store.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::task::AgentRole;
use crate::domain::models::verified_file::FileAction;
use crate::domain::models::{AgentRun, VerifiedFileEvent};
use crate::domain::ports::run_repository::RunRepository;
use crate::infrastructure::database::utils::parse_datetime;

pub struct RunRepositoryImpl {
    pool: SqlitePool,
}

impl RunRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> DomainResult<AgentRun> {
        let role_str: String = row.get("role");
        let role = AgentRole::from_str(&role_str)
            .ok_or_else(|| DomainError::SerializationError(format!("bad role {role_str:?}")))?;

        Ok(AgentRun {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            task_id: parse_uuid(&row.get::<String, _>("task_id"))?,
            step_index: u32::try_from(row.get::<i64, _>("step_index")).unwrap_or(0),
            role,
            title: row.get("title"),
            subtitle: row.get("subtitle"),
            reasoning: row.get("reasoning"),
            invocations: serde_json::from_str(&row.get::<String, _>("tool_invocations"))?,
            confidence: row.get("confidence"),
            review_required: row.get::<i64, _>("review_required") != 0,
            duration_ms: u64::try_from(row.get::<i64, _>("duration_ms")).unwrap_or(0),
            created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
        })
    }

    fn row_to_file_event(row: &sqlx::sqlite::SqliteRow) -> DomainResult<VerifiedFileEvent> {
        let action_str: String = row.get("action");
        let action = FileAction::from_str(&action_str)
            .ok_or_else(|| DomainError::SerializationError(format!("bad action {action_str:?}")))?;

        Ok(VerifiedFileEvent {
            task_id: parse_uuid(&row.get::<String, _>("task_id"))?,
            step_index: u32::try_from(row.get::<i64, _>("step_index")).unwrap_or(0),
            path: row.get("path"),
            action,
            byte_size: u64::try_from(row.get::<i64, _>("byte_size")).unwrap_or(0),
            checks_passed: serde_json::from_str(&row.get::<String, _>("checks_passed"))?,
            quality_warnings: serde_json::from_str(&row.get::<String, _>("quality_warnings"))?,
            timestamp: parse_datetime(&row.get::<String, _>("created_at"))?,
        })
    }
}

fn parse_uuid(s: &str) -> DomainResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DomainError::SerializationError(format!("bad uuid {s:?}: {e}")))
}

#[async_trait]
impl RunRepository for RunRepositoryImpl {
    async fn append_run(&self, run: &AgentRun) -> DomainResult<()> {
        let invocations = serde_json::to_string(&run.invocations)?;

        sqlx::query(
            r"
            INSERT INTO agent_runs (
                id, task_id, step_index, role, title, subtitle, reasoning,
                tool_invocations, confidence, review_required, duration_ms,
                created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(run.id.to_string())
        .bind(run.task_id.to_string())
        .bind(i64::from(run.step_index))
        .bind(run.role.as_str())
        .bind(&run.title)
        .bind(&run.subtitle)
        .bind(&run.reasoning)
        .bind(invocations)
        .bind(run.confidence)
        .bind(i64::from(run.review_required))
        .bind(i64::try_from(run.duration_ms).unwrap_or(i64::MAX))
        .bind(run.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_runs(&self, task_id: Uuid) -> DomainResult<Vec<AgentRun>> {
        let rows = sqlx::query(
            "SELECT id, task_id, step_index, role, title, subtitle, reasoning, \
             tool_invocations, confidence, review_required, duration_ms, created_at \
             FROM agent_runs WHERE task_id = ? ORDER BY step_index ASC, created_at ASC",
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_run).collect()
    }

    async fn append_file_event(&self, event: &VerifiedFileEvent) -> DomainResult<()> {
        let checks = serde_json::to_string(&event.checks_passed)?;
        let warnings = serde_json::to_string(&event.quality_warnings)?;

        sqlx::query(
            r"
            INSERT INTO verified_file_events (
                task_id, step_index, path, action, byte_size, checks_passed,
                quality_warnings, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(event.task_id.to_string())
        .bind(i64::from(event.step_index))
        .bind(&event.path)
        .bind(event.action.as_str())
        .bind(i64::try_from(event.byte_size).unwrap_or(i64::MAX))
        .bind(checks)
        .bind(warnings)
        .bind(event.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_file_events(&self, task_id: Uuid) -> DomainResult<Vec<VerifiedFileEvent>> {
        let rows = sqlx::query(
            "SELECT task_id, step_index, path, action, byte_size, checks_passed, \
             quality_warnings, created_at \
             FROM verified_file_events WHERE task_id = ? ORDER BY id ASC",
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_file_event).collect()
    }
}
