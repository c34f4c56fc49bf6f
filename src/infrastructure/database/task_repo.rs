//! SQLite implementation of the task repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult, ErrorKind};
use crate::domain::models::task::AgentRole;
use crate::domain::models::{Task, TaskStatus};
use crate::domain::ports::task_repository::{TaskFilter, TaskRepository};
use crate::infrastructure::database::utils::{parse_datetime, parse_opt_datetime};

pub struct TaskRepositoryImpl {
    pool: SqlitePool,
}

impl TaskRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> DomainResult<Task> {
        let status_str: String = row.get("status");
        let status = TaskStatus::from_str(&status_str)
            .ok_or_else(|| DomainError::SerializationError(format!("bad status {status_str:?}")))?;

        let paused_from = row
            .get::<Option<String>, _>("paused_from")
            .as_deref()
            .and_then(TaskStatus::from_str);

        let current_role = row
            .get::<Option<String>, _>("current_role")
            .as_deref()
            .and_then(AgentRole::from_str);

        Ok(Task {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            parent_task_id: row
                .get::<Option<String>, _>("parent_task_id")
                .as_deref()
                .map(parse_uuid)
                .transpose()?,
            repo_id: parse_uuid(&row.get::<String, _>("repo_id"))?,
            user_request: row.get("user_request"),
            title: row.get("title"),
            status,
            paused_from,
            current_role,
            current_step: u32::try_from(row.get::<i64, _>("current_step")).unwrap_or(0),
            plan: row
                .get::<Option<String>, _>("plan")
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            depends_on: row
                .get::<Option<String>, _>("depends_on")
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?
                .unwrap_or_default(),
            retry_count: u32::try_from(row.get::<i64, _>("retry_count")).unwrap_or(0),
            fix_depth: u32::try_from(row.get::<i64, _>("fix_depth")).unwrap_or(0),
            requires_review: row.get::<i64, _>("requires_review") != 0,
            error_message: row.get("error_message"),
            error_kind: row
                .get::<Option<String>, _>("error_kind")
                .as_deref()
                .and_then(ErrorKind::from_str),
            heartbeat_at: parse_opt_datetime(row.get::<Option<String>, _>("heartbeat_at").as_deref())?,
            created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
            updated_at: parse_datetime(&row.get::<String, _>("updated_at"))?,
            completed_at: parse_opt_datetime(
                row.get::<Option<String>, _>("completed_at").as_deref(),
            )?,
        })
    }

    async fn fetch_where(&self, sql: &str, binds: Vec<String>) -> DomainResult<Vec<Task>> {
        let mut query = sqlx::query(sql);
        for bind in &binds {
            query = query.bind(bind.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }
}

fn parse_uuid(s: &str) -> DomainResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DomainError::SerializationError(format!("bad uuid {s:?}: {e}")))
}

const SELECT_COLUMNS: &str = "SELECT id, parent_task_id, repo_id, user_request, title, status, \
     paused_from, current_role, current_step, plan, depends_on, retry_count, fix_depth, \
     requires_review, error_message, error_kind, heartbeat_at, created_at, updated_at, \
     completed_at FROM tasks";

#[async_trait]
impl TaskRepository for TaskRepositoryImpl {
    async fn insert(&self, task: &Task) -> DomainResult<()> {
        let plan = task.plan.as_ref().map(serde_json::to_string).transpose()?;
        let depends_on = if task.depends_on.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&task.depends_on)?)
        };

        sqlx::query(
            r"
            INSERT INTO tasks (
                id, parent_task_id, repo_id, user_request, title, status,
                paused_from, current_role, current_step, plan, depends_on,
                retry_count, fix_depth, requires_review, error_message,
                error_kind, heartbeat_at, created_at, updated_at, completed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(task.id.to_string())
        .bind(task.parent_task_id.map(|id| id.to_string()))
        .bind(task.repo_id.to_string())
        .bind(&task.user_request)
        .bind(&task.title)
        .bind(task.status.as_str())
        .bind(task.paused_from.map(|s| s.as_str()))
        .bind(task.current_role.map(|r| r.as_str()))
        .bind(i64::from(task.current_step))
        .bind(plan)
        .bind(depends_on)
        .bind(i64::from(task.retry_count))
        .bind(i64::from(task.fix_depth))
        .bind(i64::from(task.requires_review))
        .bind(&task.error_message)
        .bind(task.error_kind.map(|k| k.as_str()))
        .bind(task.heartbeat_at.map(|dt| dt.to_rfc3339()))
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .bind(task.completed_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn update_with_expected_status(
        &self,
        task: &Task,
        expected: TaskStatus,
    ) -> DomainResult<bool> {
        let plan = task.plan.as_ref().map(serde_json::to_string).transpose()?;
        let depends_on = if task.depends_on.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&task.depends_on)?)
        };

        let result = sqlx::query(
            r"
            UPDATE tasks SET
                status = ?,
                paused_from = ?,
                current_role = ?,
                current_step = ?,
                plan = ?,
                depends_on = ?,
                retry_count = ?,
                fix_depth = ?,
                requires_review = ?,
                error_message = ?,
                error_kind = ?,
                heartbeat_at = ?,
                updated_at = ?,
                completed_at = ?
            WHERE id = ? AND status = ?
            ",
        )
        .bind(task.status.as_str())
        .bind(task.paused_from.map(|s| s.as_str()))
        .bind(task.current_role.map(|r| r.as_str()))
        .bind(i64::from(task.current_step))
        .bind(plan)
        .bind(depends_on)
        .bind(i64::from(task.retry_count))
        .bind(i64::from(task.fix_depth))
        .bind(i64::from(task.requires_review))
        .bind(&task.error_message)
        .bind(task.error_kind.map(|k| k.as_str()))
        .bind(task.heartbeat_at.map(|dt| dt.to_rfc3339()))
        .bind(task.updated_at.to_rfc3339())
        .bind(task.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(task.id.to_string())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_cascade(&self, id: Uuid) -> DomainResult<bool> {
        // Child rows (descendant tasks, runs, file events, task events) go
        // via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>> {
        let mut sql = format!("{SELECT_COLUMNS} WHERE 1 = 1");
        let mut binds: Vec<String> = Vec::new();

        if let Some(repo_id) = filter.repo_id {
            sql.push_str(" AND repo_id = ?");
            binds.push(repo_id.to_string());
        }
        if let Some(parent) = filter.parent_task_id {
            sql.push_str(" AND parent_task_id = ?");
            binds.push(parent.to_string());
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            binds.push(status.as_str().to_string());
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        self.fetch_where(&sql, binds).await
    }

    async fn list_children(&self, parent_id: Uuid) -> DomainResult<Vec<Task>> {
        let sql = format!("{SELECT_COLUMNS} WHERE parent_task_id = ? ORDER BY created_at ASC");
        self.fetch_where(&sql, vec![parent_id.to_string()]).await
    }

    async fn descendants(&self, id: Uuid) -> DomainResult<Vec<Task>> {
        let sql = format!(
            r"
            WITH RECURSIVE sub(id) AS (
                SELECT id FROM tasks WHERE parent_task_id = ?1
                UNION
                SELECT t.id FROM tasks t JOIN sub s ON t.parent_task_id = s.id
            )
            {SELECT_COLUMNS}
            WHERE id IN (SELECT id FROM sub)
            ORDER BY created_at ASC
            "
        );
        let rows = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn record_heartbeat(&self, id: Uuid, at: DateTime<Utc>) -> DomainResult<()> {
        sqlx::query("UPDATE tasks SET heartbeat_at = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_heartbeat(&self, id: Uuid) -> DomainResult<()> {
        sqlx::query("UPDATE tasks SET heartbeat_at = NULL WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_expired_leases(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<Task>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE status IN ('planning', 'executing', 'testing', 'documenting') \
             AND heartbeat_at IS NOT NULL AND heartbeat_at < ? ORDER BY created_at ASC"
        );
        self.fetch_where(&sql, vec![cutoff.to_rfc3339()]).await
    }

    async fn list_dispatchable(&self) -> DomainResult<Vec<Task>> {
        // Pending tasks, plus mid-phase tasks with no live lease (resumed
        // after a pause, or approved out of plan review).
        let sql = format!(
            "{SELECT_COLUMNS} WHERE status = 'pending' \
             OR (status IN ('planning', 'executing', 'testing', 'documenting') \
                 AND heartbeat_at IS NULL) \
             ORDER BY created_at ASC, id ASC"
        );
        self.fetch_where(&sql, vec![]).await
    }
}
