//! SQLite implementation of the per-task event log.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::TaskEvent;
use crate::domain::ports::event_repository::EventRepository;
use crate::infrastructure::database::utils::parse_datetime;

pub struct EventRepositoryImpl {
    pool: SqlitePool,
}

impl EventRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> DomainResult<TaskEvent> {
        let task_id_str: String = row.get("task_id");
        let task_id = Uuid::parse_str(&task_id_str)
            .map_err(|e| DomainError::SerializationError(format!("bad uuid: {e}")))?;

        Ok(TaskEvent {
            task_id,
            seq: u64::try_from(row.get::<i64, _>("seq")).unwrap_or(0),
            timestamp: parse_datetime(&row.get::<String, _>("created_at"))?,
            payload: serde_json::from_str(&row.get::<String, _>("payload"))?,
        })
    }
}

#[async_trait]
impl EventRepository for EventRepositoryImpl {
    async fn append(&self, event: &TaskEvent) -> DomainResult<()> {
        let payload = serde_json::to_string(&event.payload)?;

        sqlx::query(
            "INSERT INTO task_events (task_id, seq, kind, payload, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(event.task_id.to_string())
        .bind(i64::try_from(event.seq).unwrap_or(i64::MAX))
        .bind(event.payload.kind())
        .bind(payload)
        .bind(event.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn replay(&self, task_id: Uuid, since: Option<u64>) -> DomainResult<Vec<TaskEvent>> {
        let rows = match since {
            Some(seq) => {
                sqlx::query(
                    "SELECT task_id, seq, payload, created_at FROM task_events \
                     WHERE task_id = ? AND seq > ? ORDER BY seq ASC",
                )
                .bind(task_id.to_string())
                .bind(i64::try_from(seq).unwrap_or(i64::MAX))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT task_id, seq, payload, created_at FROM task_events \
                     WHERE task_id = ? ORDER BY seq ASC",
                )
                .bind(task_id.to_string())
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(Self::row_to_event).collect()
    }

    async fn latest_seq(&self, task_id: Uuid) -> DomainResult<Option<u64>> {
        let row = sqlx::query("SELECT MAX(seq) AS max_seq FROM task_events WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_one(&self.pool)
            .await?;

        let max_seq: Option<i64> = row.get("max_seq");
        Ok(max_seq.map(|s| u64::try_from(s).unwrap_or(0)))
    }
}
