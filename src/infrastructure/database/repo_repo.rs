//! SQLite implementation of the repository registry.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Repository;
use crate::domain::ports::repo_repository::RepoRepository;
use crate::infrastructure::database::utils::parse_datetime;

pub struct RepoRepositoryImpl {
    pool: SqlitePool,
}

impl RepoRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_repo(row: &sqlx::sqlite::SqliteRow) -> DomainResult<Repository> {
        let id_str: String = row.get("id");
        let id = Uuid::parse_str(&id_str)
            .map_err(|e| DomainError::SerializationError(format!("bad uuid: {e}")))?;

        Ok(Repository {
            id,
            path: row.get("path"),
            name: row.get("name"),
            project_type: row.get("project_type"),
            framework: row.get("framework"),
            created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
            updated_at: parse_datetime(&row.get::<String, _>("updated_at"))?,
        })
    }
}

#[async_trait]
impl RepoRepository for RepoRepositoryImpl {
    async fn insert(&self, repo: &Repository) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO repositories (id, path, name, project_type, framework, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(repo.id.to_string())
        .bind(&repo.path)
        .bind(&repo.name)
        .bind(&repo.project_type)
        .bind(&repo.framework)
        .bind(repo.created_at.to_rfc3339())
        .bind(repo.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Repository>> {
        let row = sqlx::query("SELECT * FROM repositories WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_repo).transpose()
    }

    async fn get_by_path(&self, path: &str) -> DomainResult<Option<Repository>> {
        let row = sqlx::query("SELECT * FROM repositories WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_repo).transpose()
    }

    async fn list(&self) -> DomainResult<Vec<Repository>> {
        let rows = sqlx::query("SELECT * FROM repositories ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_repo).collect()
    }
}
