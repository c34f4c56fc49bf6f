//! Repository registry port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Repository;

#[async_trait]
pub trait RepoRepository: Send + Sync {
    async fn insert(&self, repo: &Repository) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<Repository>>;

    async fn get_by_path(&self, path: &str) -> DomainResult<Option<Repository>>;

    async fn list(&self) -> DomainResult<Vec<Repository>>;
}
