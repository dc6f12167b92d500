//! Raw row shapes and their conversion into domain records.

use imagegen_core::error::StoreError;
use imagegen_core::provider_config::ProviderConfig;
use imagegen_core::task::{Task, TaskParams, TaskStatus};
use imagegen_core::types::Timestamp;
use sqlx::FromRow;

/// A row from the `generation_tasks` table as stored.
#[derive(Debug, FromRow)]
pub struct TaskRow {
    pub task_id: String,
    pub status: String,
    pub provider_name: String,
    pub model_id: String,
    pub prompt: String,
    pub params: serde_json::Value,
    pub total_count: i32,
    pub completed_count: i32,
    pub local_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub image_url: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status: TaskStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::Backend(format!("task {}: {e}", row.task_id)))?;
        let params: TaskParams = serde_json::from_value(row.params).map_err(|e| {
            StoreError::Backend(format!("task {}: malformed params: {e}", row.task_id))
        })?;

        Ok(Task {
            task_id: row.task_id,
            status,
            provider_name: row.provider_name,
            model_id: row.model_id,
            prompt: row.prompt,
            params,
            total_count: row.total_count,
            completed_count: row.completed_count,
            local_path: row.local_path,
            thumbnail_path: row.thumbnail_path,
            image_url: row.image_url,
            width: row.width,
            height: row.height,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

/// A row from the `provider_configs` table.
#[derive(Debug, FromRow)]
pub struct ProviderConfigRow {
    pub provider_name: String,
    pub display_name: String,
    pub api_key: String,
    pub api_base: String,
    pub enabled: bool,
    pub models: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<ProviderConfigRow> for ProviderConfig {
    fn from(row: ProviderConfigRow) -> Self {
        ProviderConfig {
            provider_name: row.provider_name,
            display_name: row.display_name,
            api_key: row.api_key,
            api_base: row.api_base,
            enabled: row.enabled,
            models: row.models,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Map a driver error into a port error.
///
/// PostgreSQL unique violations (SQLSTATE 23505) become `AlreadyExists`;
/// everything else is reported as a backend failure.
pub(crate) fn store_error(err: sqlx::Error, entity: &'static str, id: &str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::AlreadyExists {
                entity,
                id: id.to_string(),
            };
        }
    }
    tracing::error!(error = %err, entity, id, "Database error");
    StoreError::Backend(err.to_string())
}
