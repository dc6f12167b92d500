//! Task admission and the worker pool.
//!
//! [`Dispatcher::submit`] validates a request, reserves a queue slot, and
//! writes the `queued` record. [`Dispatcher::run`] pops ids in admission
//! order whenever a worker slot is free, claims each with a
//! compare-and-set `queued -> processing`, and hands it to a [`Worker`].

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use imagegen_core::error::{CoreError, StoreError};
use imagegen_core::model_resolution::{resolve_model_id, ModelPurpose, ModelResolveOptions};
use imagegen_core::ports::{ProviderConfigStore, TaskStore};
use imagegen_core::task::{
    validate_aspect_ratio, validate_count, validate_model_id, validate_prompt, validate_task_id,
    NewTask, ReferenceImage, Task, TaskListQuery, TaskParams, TaskStatus,
};
use imagegen_providers::{GenerationRequest, ProviderRegistry};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactStore;
use crate::notifier::TaskNotifier;
use crate::queue::{AdmissionError, AdmissionQueue};
use crate::worker::Worker;

/// Error message written to a task withdrawn before processing.
pub const CANCELLED_MESSAGE: &str = "cancelled before processing";

/// Error message written to a task orphaned by a restart mid-generation.
pub const INTERRUPTED_MESSAGE: &str = "interrupted by service restart";

/// Page size used when scanning the store at startup.
const RECOVERY_PAGE: i64 = 100;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum tasks processed concurrently.
    pub worker_count: usize,
    /// Maximum tasks admitted but not yet picked up.
    pub queue_capacity: usize,
    /// Provider used when a request names none.
    pub default_provider: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: 3,
            queue_capacity: 100,
            default_provider: "gemini".to_string(),
        }
    }
}

/// A generation request as accepted from a caller.
#[derive(Debug, Clone, Default)]
pub struct NewGeneration {
    /// Caller-chosen id; a UUID is generated when absent.
    pub task_id: Option<String>,
    pub provider: Option<String>,
    pub model_id: Option<String>,
    pub prompt: String,
    pub aspect_ratio: Option<String>,
    /// Number of images, default 1.
    pub count: Option<i32>,
    pub reference_images: Vec<ReferenceImage>,
    pub params: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("no model could be resolved for provider '{0}'")]
    UnresolvedModel(String),

    #[error("task queue is full, try again later")]
    Capacity,

    #[error("task '{0}' already exists")]
    DuplicateTask(String),

    #[error("task '{0}' not found")]
    NotFound(String),

    #[error("task '{0}' is not queued")]
    NotQueued(String),

    #[error("task '{0}' has not failed")]
    NotFailed(String),

    #[error("dispatcher is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CoreError> for SubmitError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => SubmitError::InvalidRequest(msg),
            CoreError::NotFound { id, .. } => SubmitError::NotFound(id),
            CoreError::Conflict(msg) | CoreError::Internal(msg) => {
                SubmitError::Store(StoreError::Backend(msg))
            }
        }
    }
}

/// Outcome of [`Dispatcher::recover`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    pub requeued: usize,
    pub failed: usize,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    store: Arc<dyn TaskStore>,
    provider_configs: Arc<dyn ProviderConfigStore>,
    registry: Arc<ProviderRegistry>,
    notifier: Arc<dyn TaskNotifier>,
    queue: AdmissionQueue,
    worker: Worker,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        store: Arc<dyn TaskStore>,
        provider_configs: Arc<dyn ProviderConfigStore>,
        registry: Arc<ProviderRegistry>,
        artifacts: Arc<ArtifactStore>,
        notifier: Arc<dyn TaskNotifier>,
    ) -> Self {
        let queue = AdmissionQueue::new(config.queue_capacity);
        let worker = Worker::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            artifacts,
            Arc::clone(&notifier),
        );
        Self {
            config,
            store,
            provider_configs,
            registry,
            notifier,
            queue,
            worker,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Ids admitted but not yet picked up by a worker slot.
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Validate and admit a request. Returns the `queued` task.
    ///
    /// A full queue is rejected with [`SubmitError::Capacity`] before any
    /// record is written.
    pub async fn submit(&self, input: NewGeneration) -> Result<Task, SubmitError> {
        let task_id = match input.task_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => {
                validate_task_id(id)?;
                id.to_string()
            }
            _ => uuid::Uuid::new_v4().to_string(),
        };
        validate_prompt(&input.prompt)?;
        let count = input.count.unwrap_or(1);
        validate_count(count)?;
        let aspect_ratio = input
            .aspect_ratio
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        validate_aspect_ratio(aspect_ratio.as_deref())?;

        let provider_name = input
            .provider
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| self.config.default_provider.clone());
        let provider = self
            .registry
            .get(&provider_name)
            .ok_or_else(|| SubmitError::UnknownProvider(provider_name.clone()))?;

        let mut request = GenerationRequest {
            model_id: String::new(),
            prompt: input.prompt,
            aspect_ratio,
            count,
            reference_images: input.reference_images,
            extra: input.params,
        };
        provider
            .validate_params(&request)
            .map_err(|e| SubmitError::InvalidRequest(e.to_string()))?;

        let provider_config = self.provider_configs.find(&provider_name).await?;
        let resolution = resolve_model_id(&ModelResolveOptions {
            provider_name: &provider_name,
            purpose: ModelPurpose::Image,
            request_model: input.model_id.as_deref(),
            params: Some(&request.extra),
            config: provider_config.as_ref(),
        })
        .ok_or_else(|| SubmitError::UnresolvedModel(provider_name.clone()))?;
        validate_model_id(&resolution.id)?;
        request.model_id = resolution.id;

        let new_task = NewTask {
            task_id,
            provider_name,
            model_id: request.model_id,
            prompt: request.prompt,
            params: TaskParams {
                aspect_ratio: request.aspect_ratio,
                reference_images: request.reference_images,
                extra: request.extra,
            },
            total_count: count,
        };

        let slot = self.queue.reserve().map_err(|e| match e {
            AdmissionError::Full => SubmitError::Capacity,
            AdmissionError::Closed => SubmitError::ShuttingDown,
        })?;

        let task = self.store.create(&new_task).await.map_err(|e| match e {
            StoreError::AlreadyExists { id, .. } => SubmitError::DuplicateTask(id),
            other => SubmitError::Store(other),
        })?;
        slot.send(task.task_id.clone());

        tracing::info!(
            task_id = %task.task_id,
            provider = %task.provider_name,
            model = %task.model_id,
            model_source = resolution.source.as_str(),
            count,
            "Task queued",
        );
        Ok(task)
    }

    /// Withdraw a task that no worker has claimed yet.
    pub async fn withdraw(&self, task_id: &str) -> Result<Task, SubmitError> {
        if let Some(task) = self.store.withdraw(task_id, CANCELLED_MESSAGE).await? {
            tracing::info!(task_id, "Task withdrawn");
            self.notifier.notify_error(task_id, CANCELLED_MESSAGE).await;
            return Ok(task);
        }
        match self.store.find(task_id).await? {
            None => Err(SubmitError::NotFound(task_id.to_string())),
            Some(_) => Err(SubmitError::NotQueued(task_id.to_string())),
        }
    }

    /// Resubmit a failed task's request under a new task id.
    pub async fn retry(&self, task_id: &str) -> Result<Task, SubmitError> {
        let task = self
            .store
            .find(task_id)
            .await?
            .ok_or_else(|| SubmitError::NotFound(task_id.to_string()))?;
        if task.status != TaskStatus::Failed {
            return Err(SubmitError::NotFailed(task_id.to_string()));
        }

        let retried = self
            .submit(NewGeneration {
                task_id: None,
                provider: Some(task.provider_name),
                model_id: Some(task.model_id),
                prompt: task.prompt,
                aspect_ratio: task.params.aspect_ratio,
                count: Some(task.total_count),
                reference_images: task.params.reference_images,
                params: task.params.extra,
            })
            .await?;
        tracing::info!(task_id, retried_as = %retried.task_id, "Failed task resubmitted");
        Ok(retried)
    }

    /// Reconcile tasks left over from a previous process.
    ///
    /// Tasks still `processing` have lost their worker and are failed.
    /// Tasks still `queued` are re-admitted oldest first; those that do not
    /// fit in the queue are withdrawn.
    pub async fn recover(&self) -> Result<RecoverySummary, StoreError> {
        let mut summary = RecoverySummary::default();

        loop {
            let orphaned = self
                .store
                .list(&page(TaskStatus::Processing, 0))
                .await?;
            if orphaned.is_empty() {
                break;
            }
            for task in orphaned {
                if self.store.fail(&task.task_id, INTERRUPTED_MESSAGE).await?.is_some() {
                    summary.failed += 1;
                }
            }
        }

        let mut queued = Vec::new();
        let mut offset = 0;
        loop {
            let batch = self.store.list(&page(TaskStatus::Queued, offset)).await?;
            let len = batch.len() as i64;
            queued.extend(batch);
            if len < RECOVERY_PAGE {
                break;
            }
            offset += len;
        }

        // Listing is newest first.
        for task in queued.into_iter().rev() {
            match self.queue.reserve() {
                Ok(slot) => {
                    slot.send(task.task_id);
                    summary.requeued += 1;
                }
                Err(_) => {
                    if self.store.withdraw(&task.task_id, CANCELLED_MESSAGE).await?.is_some() {
                        summary.failed += 1;
                    }
                }
            }
        }

        if summary != RecoverySummary::default() {
            tracing::info!(
                requeued = summary.requeued,
                failed = summary.failed,
                "Recovered tasks from previous run",
            );
        }
        Ok(summary)
    }

    /// Run the worker pool until `cancel` fires, then wait for in-flight
    /// workers to finish. Ids still queued at shutdown stay `queued` in the
    /// store and are picked up by [`recover`](Self::recover) on next boot.
    pub async fn run(&self, cancel: CancellationToken) {
        let Some(mut rx) = self.queue.take_receiver().await else {
            tracing::error!("Dispatcher is already running");
            return;
        };
        let slots = Arc::new(Semaphore::new(self.config.worker_count.max(1)));
        let mut workers = JoinSet::new();

        tracing::info!(
            worker_count = self.config.worker_count,
            queue_capacity = self.queue.capacity(),
            "Task dispatcher started",
        );

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let task_id = tokio::select! {
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(id) => id,
                    None => break,
                },
            };

            match self.store.claim(&task_id).await {
                Ok(Some(task)) => {
                    let worker = self.worker.clone();
                    workers.spawn(async move {
                        let _permit = permit;
                        worker.run(task).await;
                    });
                }
                Ok(None) => {
                    tracing::debug!(task_id = %task_id, "Task no longer queued, skipping");
                }
                Err(e) => {
                    tracing::error!(task_id = %task_id, error = %e, "Failed to claim task");
                }
            }

            while let Some(result) = workers.try_join_next() {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Worker task panicked");
                }
            }
        }

        rx.close();
        tracing::info!(in_flight = workers.len(), "Task dispatcher shutting down");
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
        tracing::info!("Task dispatcher stopped");
    }
}

fn page(status: TaskStatus, offset: i64) -> TaskListQuery {
    TaskListQuery {
        status: Some(status),
        limit: Some(RECOVERY_PAGE),
        offset: Some(offset),
    }
}

/// Parse an uploaded reference image.
///
/// Accepts a `data:<mime>;base64,<payload>` URL or bare base64; for bare
/// base64 the MIME type is sniffed from the decoded bytes.
pub fn parse_reference_image(raw: &str) -> Result<ReferenceImage, SubmitError> {
    let raw = raw.trim();
    let (declared, payload) = match raw.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest.split_once(',').ok_or_else(|| {
                SubmitError::InvalidRequest("malformed reference image data URL".to_string())
            })?;
            let mime = header.strip_suffix(";base64").ok_or_else(|| {
                SubmitError::InvalidRequest("reference image data URL must be base64".to_string())
            })?;
            (Some(mime.to_string()), payload)
        }
        None => (None, raw),
    };

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| SubmitError::InvalidRequest(format!("reference image is not base64: {e}")))?;
    if bytes.is_empty() {
        return Err(SubmitError::InvalidRequest("reference image is empty".to_string()));
    }
    let mime_type = match declared {
        Some(mime) => mime,
        None => image::guess_format(&bytes)
            .map(|f| f.to_mime_type().to_string())
            .map_err(|_| {
                SubmitError::InvalidRequest("reference image format not recognized".to_string())
            })?,
    };

    Ok(ReferenceImage {
        mime_type,
        data: payload.to_string(),
    })
}
