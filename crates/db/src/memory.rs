//! In-memory implementations of the storage ports.
//!
//! Same compare-and-set transition semantics as the PostgreSQL stores,
//! without a database. Used by unit and integration tests across the
//! workspace.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use imagegen_core::error::StoreError;
use imagegen_core::ports::{ProviderConfigStore, TaskStore};
use imagegen_core::provider_config::{
    NewProviderConfig, ProviderConfig, ProviderConfigPatch, ProviderFilter,
};
use imagegen_core::task::{NewTask, Task, TaskListQuery, TaskResult, TaskStatus};
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TaskTable {
    next_seq: u64,
    rows: HashMap<String, (u64, Task)>,
}

/// [`TaskStore`] held in a process-local map.
#[derive(Default)]
pub struct MemoryTaskStore {
    inner: RwLock<TaskTable>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tasks.
    pub async fn len(&self) -> usize {
        self.inner.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Apply `f` to the task if it is currently in `from`.
    async fn transition<F>(&self, task_id: &str, from: TaskStatus, f: F) -> Option<Task>
    where
        F: FnOnce(&mut Task),
    {
        let mut table = self.inner.write().await;
        let (_, task) = table.rows.get_mut(task_id)?;
        if task.status != from {
            return None;
        }
        f(task);
        task.updated_at = Utc::now();
        Some(task.clone())
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, input: &NewTask) -> Result<Task, StoreError> {
        let mut table = self.inner.write().await;
        if table.rows.contains_key(&input.task_id) {
            return Err(StoreError::AlreadyExists {
                entity: "Task",
                id: input.task_id.clone(),
            });
        }
        let task = Task::queued(input.clone(), Utc::now());
        let seq = table.next_seq;
        table.next_seq += 1;
        table.rows.insert(task.task_id.clone(), (seq, task.clone()));
        Ok(task)
    }

    async fn find(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .rows
            .get(task_id)
            .map(|(_, t)| t.clone()))
    }

    async fn list(&self, query: &TaskListQuery) -> Result<Vec<Task>, StoreError> {
        let (limit, offset) = query.page();
        let table = self.inner.read().await;
        let mut rows: Vec<&(u64, Task)> = table
            .rows
            .values()
            .filter(|(_, t)| query.status.is_none_or(|s| t.status == s))
            .collect();
        rows.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn claim(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self
            .transition(task_id, TaskStatus::Queued, |t| {
                t.status = TaskStatus::Processing;
            })
            .await)
    }

    async fn record_progress(&self, task_id: &str, completed_count: i32) -> Result<(), StoreError> {
        self.transition(task_id, TaskStatus::Processing, |t| {
            t.completed_count = completed_count.min(t.total_count);
        })
        .await;
        Ok(())
    }

    async fn complete(&self, task_id: &str, result: &TaskResult) -> Result<Option<Task>, StoreError> {
        Ok(self
            .transition(task_id, TaskStatus::Processing, |t| {
                t.status = TaskStatus::Completed;
                t.local_path = result.local_path.clone();
                t.thumbnail_path = result.thumbnail_path.clone();
                t.image_url = result.image_url.clone();
                t.width = result.width;
                t.height = result.height;
                t.completed_count = t.total_count;
                t.error_message = None;
                t.completed_at = Some(Utc::now());
            })
            .await)
    }

    async fn fail(&self, task_id: &str, message: &str) -> Result<Option<Task>, StoreError> {
        Ok(self
            .transition(task_id, TaskStatus::Processing, |t| {
                t.status = TaskStatus::Failed;
                t.error_message = Some(message.to_string());
                t.completed_at = Some(Utc::now());
            })
            .await)
    }

    async fn withdraw(&self, task_id: &str, message: &str) -> Result<Option<Task>, StoreError> {
        Ok(self
            .transition(task_id, TaskStatus::Queued, |t| {
                t.status = TaskStatus::Failed;
                t.error_message = Some(message.to_string());
                t.completed_at = Some(Utc::now());
            })
            .await)
    }
}

// ---------------------------------------------------------------------------
// Provider configuration
// ---------------------------------------------------------------------------

/// [`ProviderConfigStore`] held in a process-local ordered map.
#[derive(Default)]
pub struct MemoryProviderConfigStore {
    rows: RwLock<BTreeMap<String, ProviderConfig>>,
}

impl MemoryProviderConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProviderConfigStore for MemoryProviderConfigStore {
    async fn find(&self, provider_name: &str) -> Result<Option<ProviderConfig>, StoreError> {
        Ok(self.rows.read().await.get(provider_name).cloned())
    }

    async fn insert(&self, input: &NewProviderConfig) -> Result<ProviderConfig, StoreError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&input.provider_name) {
            return Err(StoreError::AlreadyExists {
                entity: "ProviderConfig",
                id: input.provider_name.clone(),
            });
        }
        let now = Utc::now();
        let config = ProviderConfig {
            provider_name: input.provider_name.clone(),
            display_name: input.display_name.clone(),
            api_key: input.api_key.clone(),
            api_base: input.api_base.clone(),
            enabled: input.enabled,
            models: input.models.clone(),
            created_at: now,
            updated_at: now,
        };
        rows.insert(config.provider_name.clone(), config.clone());
        Ok(config)
    }

    async fn update(
        &self,
        provider_name: &str,
        patch: &ProviderConfigPatch,
    ) -> Result<ProviderConfig, StoreError> {
        let mut rows = self.rows.write().await;
        let config = rows
            .get_mut(provider_name)
            .ok_or_else(|| StoreError::NotFound {
                entity: "ProviderConfig",
                id: provider_name.to_string(),
            })?;
        if let Some(api_key) = &patch.api_key {
            config.api_key = api_key.clone();
        }
        if let Some(api_base) = &patch.api_base {
            config.api_base = api_base.clone();
        }
        if let Some(models) = &patch.models {
            config.models = models.clone();
        }
        if let Some(enabled) = patch.enabled {
            config.enabled = enabled;
        }
        config.updated_at = Utc::now();
        Ok(config.clone())
    }

    async fn list(&self, filter: &ProviderFilter) -> Result<Vec<ProviderConfig>, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }
}
