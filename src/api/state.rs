//! Shared state for the HTTP API.

use std::sync::Arc;

use crate::domain::ports::{Clock, RepoRepository, RunRepository, TaskRepository};
use crate::services::{EventBus, Scheduler};

#[derive(Clone)]
pub struct AppState {
    pub tasks: Arc<dyn TaskRepository>,
    pub runs: Arc<dyn RunRepository>,
    pub repos: Arc<dyn RepoRepository>,
    pub bus: Arc<EventBus>,
    pub scheduler: Arc<Scheduler>,
    pub clock: Arc<dyn Clock>,
}
