//! Execution of one claimed task.
//!
//! The worker is the only writer for a task between its claim and its
//! terminal transition. No automatic retry is performed on failure.

use std::sync::Arc;

use futures::StreamExt;
use imagegen_core::messages::ArtifactInfo;
use imagegen_core::ports::TaskStore;
use imagegen_core::task::{Task, TaskResult};
use imagegen_providers::{GenerationRequest, ProviderError, ProviderRegistry};

use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::notifier::TaskNotifier;

#[derive(Debug, thiserror::Error)]
enum WorkerError {
    #[error("provider '{0}' is not available")]
    ProviderUnavailable(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("provider produced no images")]
    NoImages,
}

#[derive(Clone)]
pub struct Worker {
    store: Arc<dyn TaskStore>,
    registry: Arc<ProviderRegistry>,
    artifacts: Arc<ArtifactStore>,
    notifier: Arc<dyn TaskNotifier>,
}

impl Worker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<ProviderRegistry>,
        artifacts: Arc<ArtifactStore>,
        notifier: Arc<dyn TaskNotifier>,
    ) -> Self {
        Self {
            store,
            registry,
            artifacts,
            notifier,
        }
    }

    /// Drive a task that is already `processing` to a terminal state.
    pub async fn run(&self, task: Task) {
        tracing::info!(
            task_id = %task.task_id,
            provider = %task.provider_name,
            model = %task.model_id,
            total = task.total_count,
            "Task started",
        );

        match self.generate(&task).await {
            Ok(first) => self.finish(&task, &first).await,
            Err(e) => {
                tracing::warn!(task_id = %task.task_id, error = %e, "Task failed");
                self.fail(&task.task_id, &e.to_string()).await;
            }
        }
    }

    /// Stream every image, storing and reporting each one as it arrives.
    /// Returns the first stored image.
    async fn generate(&self, task: &Task) -> Result<ArtifactInfo, WorkerError> {
        let provider = self
            .registry
            .get(&task.provider_name)
            .ok_or_else(|| WorkerError::ProviderUnavailable(task.provider_name.clone()))?;

        let mut images = provider.generate(GenerationRequest::from_task(task));
        let mut first: Option<ArtifactInfo> = None;
        let mut completed = 0;

        while let Some(image) = images.next().await {
            let image = image?;
            let artifact = self.artifacts.save(&task.task_id, completed, &image).await?;
            completed += 1;
            let count = i32::try_from(completed).unwrap_or(i32::MAX);

            if let Err(e) = self.store.record_progress(&task.task_id, count).await {
                tracing::error!(task_id = %task.task_id, error = %e, "Failed to record progress");
            }
            tracing::debug!(task_id = %task.task_id, completed = count, total = task.total_count, "Image stored");
            self.notifier
                .notify_progress(&task.task_id, count, task.total_count, Some(artifact.clone()))
                .await;

            first.get_or_insert(artifact);
        }

        first.ok_or(WorkerError::NoImages)
    }

    async fn finish(&self, task: &Task, first: &ArtifactInfo) {
        match self.store.complete(&task.task_id, &TaskResult::from(first)).await {
            Ok(Some(done)) => {
                tracing::info!(task_id = %done.task_id, "Task completed");
                self.notifier.notify_complete(&done).await;
            }
            Ok(None) => {
                tracing::warn!(task_id = %task.task_id, "Task left processing before completion");
            }
            Err(e) => {
                tracing::error!(task_id = %task.task_id, error = %e, "Failed to mark task completed");
                self.fail(&task.task_id, &format!("failed to record result: {e}"))
                    .await;
            }
        }
    }

    async fn fail(&self, task_id: &str, message: &str) {
        match self.store.fail(task_id, message).await {
            Ok(Some(_)) => self.notifier.notify_error(task_id, message).await,
            Ok(None) => {
                tracing::warn!(task_id, "Task left processing before failure was recorded");
            }
            Err(e) => {
                tracing::error!(task_id, error = %e, "Failed to mark task failed");
            }
        }
    }
}
