//! Storage ports.
//!
//! The pipeline and the API only talk to persistence through these traits.
//! `imagegen-db` provides the PostgreSQL implementations and, behind its
//! `test-utils` feature, in-memory ones.
//!
//! # Design Rules
//!
//! - No `sqlx` types in signatures
//! - Status transitions are compare-and-set: a write that does not find the
//!   expected source status returns `Ok(None)` / `Ok(false)` instead of
//!   overwriting

use async_trait::async_trait;

use crate::error::StoreError;
use crate::provider_config::{
    NewProviderConfig, ProviderConfig, ProviderConfigPatch, ProviderFilter,
};
use crate::task::{NewTask, Task, TaskListQuery, TaskResult};

/// Persistence for generation tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task in `queued` status.
    ///
    /// Returns `Err(StoreError::AlreadyExists)` if the id is taken.
    async fn create(&self, input: &NewTask) -> Result<Task, StoreError>;

    /// Look up a task by id.
    async fn find(&self, task_id: &str) -> Result<Option<Task>, StoreError>;

    /// List tasks, newest first.
    async fn list(&self, query: &TaskListQuery) -> Result<Vec<Task>, StoreError>;

    /// Transition `queued -> processing`.
    ///
    /// Returns `None` if the task is missing or no longer queued.
    async fn claim(&self, task_id: &str) -> Result<Option<Task>, StoreError>;

    /// Record the number of images produced so far for a processing task.
    async fn record_progress(&self, task_id: &str, completed_count: i32)
        -> Result<(), StoreError>;

    /// Transition `processing -> completed`, writing the result fields,
    /// `completed_at`, and `completed_count = total_count`.
    async fn complete(&self, task_id: &str, result: &TaskResult)
        -> Result<Option<Task>, StoreError>;

    /// Transition `processing -> failed`, writing the error message and
    /// `completed_at`.
    async fn fail(&self, task_id: &str, message: &str) -> Result<Option<Task>, StoreError>;

    /// Transition `queued -> failed` for a task withdrawn before any worker
    /// claimed it.
    async fn withdraw(&self, task_id: &str, message: &str) -> Result<Option<Task>, StoreError>;

    /// Verify the backend is reachable.
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Persistence for provider configuration rows.
#[async_trait]
pub trait ProviderConfigStore: Send + Sync {
    async fn find(&self, provider_name: &str) -> Result<Option<ProviderConfig>, StoreError>;

    /// Insert a row. Returns `Err(StoreError::AlreadyExists)` on a name clash.
    async fn insert(&self, input: &NewProviderConfig) -> Result<ProviderConfig, StoreError>;

    /// Apply a field-level update.
    ///
    /// Returns `Err(StoreError::NotFound)` if the row does not exist.
    async fn update(
        &self,
        provider_name: &str,
        patch: &ProviderConfigPatch,
    ) -> Result<ProviderConfig, StoreError>;

    /// List rows matching the filter, ordered by provider name.
    async fn list(&self, filter: &ProviderFilter) -> Result<Vec<ProviderConfig>, StoreError>;
}
