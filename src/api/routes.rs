//! Command endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::api::stream::stream_task;
use crate::domain::errors::ErrorKind;
use crate::domain::models::{AgentRun, FileNode, Task, TaskEventPayload, TaskStatus};
use crate::domain::ports::task_repository::TaskFilter;
use crate::domain::ports::Clock;
use crate::services::{force_fail, repo_scan};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/tasks", post(create_task).get(list_tasks))
        .route("/tasks/:id", get(get_task).delete(delete_task))
        .route("/tasks/:id/approve", post(approve_task))
        .route("/tasks/:id/reject", post(reject_task))
        .route("/tasks/:id/pause", post(pause_task))
        .route("/tasks/:id/resume", post(resume_task))
        .route("/stream/task/:id", get(stream_task))
        .route("/files/tree", get(file_tree))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskBody {
    pub repo_id: Uuid,
    pub user_request: String,
    #[serde(default)]
    pub parent_task_id: Option<Uuid>,
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
}

async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<CreateTaskBody>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    if state.repos.get(body.repo_id).await?.is_none() {
        return Err(ApiError::NotFound(format!(
            "repository {} not found",
            body.repo_id
        )));
    }

    let mut task = Task::new(body.repo_id, body.user_request, state.clock.now());
    if let Some(parent_id) = body.parent_task_id {
        if state.tasks.get(parent_id).await?.is_none() {
            return Err(ApiError::NotFound(format!("task {parent_id} not found")));
        }
        task.parent_task_id = Some(parent_id);
    }
    for dep in body.depends_on {
        task = task.with_dependency(dep);
    }

    task.validate().map_err(ApiError::BadRequest)?;

    state.tasks.insert(&task).await?;
    state.scheduler.notify();

    Ok((StatusCode::CREATED, Json(task)))
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub repo_id: Option<Uuid>,
    pub parent_task_id: Option<Uuid>,
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let tasks = state
        .tasks
        .list(TaskFilter {
            repo_id: query.repo_id,
            parent_task_id: query.parent_task_id,
            status: None,
        })
        .await?;
    Ok(Json(tasks))
}

/// Task detail with embedded agent runs.
#[derive(Debug, Serialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    pub runs: Vec<AgentRun>,
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskDetail>, ApiError> {
    let task = state
        .tasks
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {id} not found")))?;
    let runs = state.runs.list_runs(id).await?;
    Ok(Json(TaskDetail { task, runs }))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.tasks.get(id).await?.is_none() {
        return Err(ApiError::NotFound(format!("task {id} not found")));
    }

    // Cancel first so live subscribers observe the final error events, then
    // remove the rows (cascade covers descendants, runs, and events).
    state.scheduler.cancel_cascade(id).await?;
    state.tasks.delete_cascade(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn approve_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let task = fetch(&state, id).await?;
    if task.status != TaskStatus::PlanReview {
        return Err(ApiError::Conflict(format!(
            "task is {}, not plan_review",
            task.status
        )));
    }

    transition(&state, task, TaskStatus::Executing).await?;
    state.scheduler.notify();
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub feedback: String,
}

async fn reject_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RejectBody>,
) -> Result<StatusCode, ApiError> {
    let task = fetch(&state, id).await?;
    if task.status != TaskStatus::PlanReview {
        return Err(ApiError::Conflict(format!(
            "task is {}, not plan_review",
            task.status
        )));
    }

    let message = format!("plan rejected: {}", body.feedback);
    force_fail(
        state.tasks.as_ref(),
        &state.bus,
        state.clock.as_ref(),
        task,
        ErrorKind::PlanRejected,
        &message,
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn pause_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let task = fetch(&state, id).await?;
    if !task.can_transition_to(TaskStatus::Paused) {
        return Err(ApiError::Conflict(format!(
            "cannot pause task in {}",
            task.status
        )));
    }

    transition(&state, task, TaskStatus::Paused).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resume_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let task = fetch(&state, id).await?;
    if task.status != TaskStatus::Paused {
        return Err(ApiError::Conflict(format!(
            "task is {}, not paused",
            task.status
        )));
    }

    let target = task.paused_from.unwrap_or(TaskStatus::Pending);
    transition(&state, task, target).await?;
    state.scheduler.notify();
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct FileTreeQuery {
    pub repo_id: Uuid,
}

async fn file_tree(
    State(state): State<AppState>,
    Query(query): Query<FileTreeQuery>,
) -> Result<Json<FileNode>, ApiError> {
    let repo = state
        .repos
        .get(query.repo_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("repository {} not found", query.repo_id)))?;

    Ok(Json(repo_scan::build_file_tree(std::path::Path::new(
        &repo.path,
    ))))
}

async fn fetch(state: &AppState, id: Uuid) -> Result<Task, ApiError> {
    state
        .tasks
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {id} not found")))
}

/// Apply an externally-commanded transition with CAS and publish the status
/// event. A lost race surfaces as a conflict.
async fn transition(state: &AppState, mut task: Task, to: TaskStatus) -> Result<(), ApiError> {
    let expected = task.status;
    task.transition_to(to, state.clock.now())
        .map_err(|e| ApiError::Conflict(e.to_string()))?;
    if to != TaskStatus::Paused {
        task.paused_from = None;
    }
    // External commands never grant a lease; a stale heartbeat left by a
    // yielding worker would otherwise block re-dispatch.
    task.heartbeat_at = None;

    if !state
        .tasks
        .update_with_expected_status(&task, expected)
        .await?
    {
        return Err(ApiError::Conflict("task changed concurrently".to_string()));
    }

    state
        .bus
        .publish(task.id, TaskEventPayload::Status { from: expected, to })
        .await?;
    Ok(())
}
