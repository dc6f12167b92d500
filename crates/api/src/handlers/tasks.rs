//! Handlers for the `/tasks` resource.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use imagegen_core::error::CoreError;
use imagegen_core::task::{Task, TaskListQuery};
use imagegen_pipeline::{parse_reference_image, NewGeneration};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for `POST /api/v1/tasks`.
#[derive(Debug, Deserialize)]
pub struct EnqueueTask {
    pub task_id: Option<String>,
    pub provider: Option<String>,
    pub model_id: Option<String>,
    pub prompt: String,
    pub aspect_ratio: Option<String>,
    pub count: Option<i32>,
    /// Base64 payloads or `data:` URLs.
    #[serde(default)]
    pub reference_images: Vec<String>,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl EnqueueTask {
    fn into_generation(self) -> AppResult<NewGeneration> {
        let reference_images = self
            .reference_images
            .iter()
            .map(|raw| parse_reference_image(raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NewGeneration {
            task_id: self.task_id,
            provider: self.provider,
            model_id: self.model_id,
            prompt: self.prompt,
            aspect_ratio: self.aspect_ratio,
            count: self.count,
            reference_images,
            params: self.params,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn find_task(state: &AppState, task_id: &str) -> AppResult<Task> {
    state
        .tasks
        .find(task_id)
        .await?
        .ok_or_else(|| {
            AppError::Core(CoreError::NotFound {
                entity: "Task",
                id: task_id.to_string(),
            })
        })
}

// ---------------------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks
///
/// Admit a generation task. Returns 202 with the queued task; progress is
/// observed through the status query or the task's WebSocket.
pub async fn enqueue_task(
    State(state): State<AppState>,
    payload: Result<Json<EnqueueTask>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(input) = payload?;
    let task = state.dispatcher.submit(input.into_generation()?).await?;

    tracing::info!(
        task_id = %task.task_id,
        provider = %task.provider_name,
        model = %task.model_id,
        count = task.total_count,
        "Task enqueued",
    );

    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: task })))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks?status=&limit=&offset=
///
/// List tasks, newest first.
pub async fn list_tasks(
    State(state): State<AppState>,
    query: Result<Query<TaskListQuery>, QueryRejection>,
) -> AppResult<impl IntoResponse> {
    let Query(query) = query?;
    let tasks = state.tasks.list(&query).await?;
    Ok(Json(DataResponse { data: tasks }))
}

/// GET /api/v1/tasks/{task_id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let task = find_task(&state, &task_id).await?;
    Ok(Json(DataResponse { data: task }))
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks/{task_id}/cancel
///
/// Withdraw a task that no worker has claimed yet. A processing task runs
/// to completion and yields 409.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let task = state.dispatcher.withdraw(&task_id).await?;

    tracing::info!(task_id = %task.task_id, "Task withdrawn");

    Ok(Json(DataResponse { data: task }))
}

/// POST /api/v1/tasks/{task_id}/retry
///
/// Resubmit a failed task's parameters under a new task id. Returns 202
/// with the new task.
pub async fn retry_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let task = state.dispatcher.retry(&task_id).await?;

    tracing::info!(
        task_id = %task.task_id,
        retry_of = %task_id,
        "Task resubmitted",
    );

    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: task })))
}
