//! Repository for the `generation_tasks` table.
//!
//! Every status transition is a single conditional `UPDATE ... WHERE
//! status = <expected>`, so concurrent writers can never move a task out of
//! a state they did not observe.

use async_trait::async_trait;
use imagegen_core::error::StoreError;
use imagegen_core::ports::TaskStore;
use imagegen_core::task::{NewTask, Task, TaskListQuery, TaskResult, TaskStatus};
use sqlx::PgPool;

use crate::rows::{store_error, TaskRow};

/// Column list for `generation_tasks` queries.
const COLUMNS: &str = "\
    task_id, status, provider_name, model_id, prompt, params, \
    total_count, completed_count, \
    local_path, thumbnail_path, image_url, width, height, \
    error_message, created_at, updated_at, completed_at";

const ENTITY: &str = "Task";

/// Provides CRUD and transition queries for generation tasks.
pub struct TaskRepo;

impl TaskRepo {
    /// Insert a new queued task.
    pub async fn create(pool: &PgPool, input: &NewTask) -> Result<Option<TaskRow>, sqlx::Error> {
        let params = serde_json::to_value(&input.params)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        let query = format!(
            "INSERT INTO generation_tasks \
                 (task_id, status, provider_name, model_id, prompt, params, total_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(&input.task_id)
            .bind(TaskStatus::Queued.as_str())
            .bind(&input.provider_name)
            .bind(&input.model_id)
            .bind(&input.prompt)
            .bind(params)
            .bind(input.total_count)
            .fetch_optional(pool)
            .await
    }

    /// Find a task by its id.
    pub async fn find_by_id(pool: &PgPool, task_id: &str) -> Result<Option<TaskRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM generation_tasks WHERE task_id = $1");
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(task_id)
            .fetch_optional(pool)
            .await
    }

    /// List tasks newest-first with an optional status filter and pagination.
    pub async fn list(pool: &PgPool, params: &TaskListQuery) -> Result<Vec<TaskRow>, sqlx::Error> {
        let (limit, offset) = params.page();
        let query = format!(
            "SELECT {COLUMNS} FROM generation_tasks \
             WHERE ($1::TEXT IS NULL OR status = $1) \
             ORDER BY created_at DESC, task_id ASC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(params.status.map(TaskStatus::as_str))
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Move a queued task to `processing`.
    pub async fn claim(pool: &PgPool, task_id: &str) -> Result<Option<TaskRow>, sqlx::Error> {
        let query = format!(
            "UPDATE generation_tasks \
             SET status = $2, updated_at = NOW() \
             WHERE task_id = $1 AND status = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(task_id)
            .bind(TaskStatus::Processing.as_str())
            .bind(TaskStatus::Queued.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Update `completed_count` while the task is processing.
    pub async fn update_progress(
        pool: &PgPool,
        task_id: &str,
        completed_count: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE generation_tasks \
             SET completed_count = LEAST($2, total_count), updated_at = NOW() \
             WHERE task_id = $1 AND status = $3",
        )
        .bind(task_id)
        .bind(completed_count)
        .bind(TaskStatus::Processing.as_str())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Mark a processing task as completed with its result fields.
    pub async fn complete(
        pool: &PgPool,
        task_id: &str,
        result: &TaskResult,
    ) -> Result<Option<TaskRow>, sqlx::Error> {
        let query = format!(
            "UPDATE generation_tasks \
             SET status = $2, local_path = $3, thumbnail_path = $4, image_url = $5, \
                 width = $6, height = $7, completed_count = total_count, \
                 error_message = NULL, completed_at = NOW(), updated_at = NOW() \
             WHERE task_id = $1 AND status = $8 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(task_id)
            .bind(TaskStatus::Completed.as_str())
            .bind(&result.local_path)
            .bind(&result.thumbnail_path)
            .bind(&result.image_url)
            .bind(result.width)
            .bind(result.height)
            .bind(TaskStatus::Processing.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Move a task from `from` to `failed` with an error message.
    ///
    /// No automatic retry is performed. A failed task stays failed; the
    /// caller resubmits it as a new task.
    pub async fn fail_from(
        pool: &PgPool,
        task_id: &str,
        from: TaskStatus,
        message: &str,
    ) -> Result<Option<TaskRow>, sqlx::Error> {
        let query = format!(
            "UPDATE generation_tasks \
             SET status = $2, error_message = $3, completed_at = NOW(), updated_at = NOW() \
             WHERE task_id = $1 AND status = $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(task_id)
            .bind(TaskStatus::Failed.as_str())
            .bind(message)
            .bind(from.as_str())
            .fetch_optional(pool)
            .await
    }
}

// ---------------------------------------------------------------------------
// Port implementation
// ---------------------------------------------------------------------------

/// [`TaskStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn into_task(row: Option<TaskRow>) -> Result<Option<Task>, StoreError> {
    row.map(Task::try_from).transpose()
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create(&self, input: &NewTask) -> Result<Task, StoreError> {
        let row = TaskRepo::create(&self.pool, input)
            .await
            .map_err(|e| store_error(e, ENTITY, &input.task_id))?
            .ok_or_else(|| StoreError::Backend("insert returned no row".to_string()))?;
        Task::try_from(row)
    }

    async fn find(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let row = TaskRepo::find_by_id(&self.pool, task_id)
            .await
            .map_err(|e| store_error(e, ENTITY, task_id))?;
        into_task(row)
    }

    async fn list(&self, query: &TaskListQuery) -> Result<Vec<Task>, StoreError> {
        TaskRepo::list(&self.pool, query)
            .await
            .map_err(|e| store_error(e, ENTITY, "*"))?
            .into_iter()
            .map(Task::try_from)
            .collect()
    }

    async fn claim(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let row = TaskRepo::claim(&self.pool, task_id)
            .await
            .map_err(|e| store_error(e, ENTITY, task_id))?;
        into_task(row)
    }

    async fn record_progress(&self, task_id: &str, completed_count: i32) -> Result<(), StoreError> {
        TaskRepo::update_progress(&self.pool, task_id, completed_count)
            .await
            .map_err(|e| store_error(e, ENTITY, task_id))
    }

    async fn complete(&self, task_id: &str, result: &TaskResult) -> Result<Option<Task>, StoreError> {
        let row = TaskRepo::complete(&self.pool, task_id, result)
            .await
            .map_err(|e| store_error(e, ENTITY, task_id))?;
        into_task(row)
    }

    async fn fail(&self, task_id: &str, message: &str) -> Result<Option<Task>, StoreError> {
        let row = TaskRepo::fail_from(&self.pool, task_id, TaskStatus::Processing, message)
            .await
            .map_err(|e| store_error(e, ENTITY, task_id))?;
        into_task(row)
    }

    async fn withdraw(&self, task_id: &str, message: &str) -> Result<Option<Task>, StoreError> {
        let row = TaskRepo::fail_from(&self.pool, task_id, TaskStatus::Queued, message)
            .await
            .map_err(|e| store_error(e, ENTITY, task_id))?;
        into_task(row)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        crate::health_check(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}
