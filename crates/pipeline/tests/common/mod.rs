//! Shared fixtures for dispatcher integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use imagegen_core::messages::TaskMessage;
use imagegen_core::ports::TaskStore;
use imagegen_core::task::Task;
use imagegen_db::memory::{MemoryProviderConfigStore, MemoryTaskStore};
use imagegen_pipeline::{ArtifactStore, Dispatcher, DispatcherConfig, NewGeneration, TaskNotifier};
use imagegen_providers::{
    GeneratedImage, GenerationRequest, ImageStream, Provider, ProviderError, ProviderFactory,
    ProviderRegistry, ProvidersConfig,
};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub fn image() -> GeneratedImage {
    GeneratedImage {
        bytes: b"fake image bytes".to_vec(),
        mime_type: "image/png".into(),
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// What a [`ScriptedProvider`] does for every request.
#[derive(Clone)]
pub enum Script {
    /// Yield `count` images.
    Succeed,
    /// Yield `n` images, then fail.
    FailAfter(usize, String),
    /// End the stream without any image.
    Nothing,
}

pub struct ScriptedProvider {
    pub name: String,
    pub script: Script,
}

impl ScriptedProvider {
    pub fn new(name: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script,
        })
    }
}

impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate_params(&self, request: &GenerationRequest) -> Result<(), ProviderError> {
        if request.extra.contains_key("unsupported") {
            return Err(ProviderError::InvalidParams("unsupported option".into()));
        }
        Ok(())
    }

    fn generate(&self, request: GenerationRequest) -> ImageStream {
        let items: Vec<Result<GeneratedImage, ProviderError>> = match &self.script {
            Script::Succeed => (0..request.count).map(|_| Ok(image())).collect(),
            Script::FailAfter(n, message) => {
                let mut items: Vec<_> = (0..*n).map(|_| Ok(image())).collect();
                items.push(Err(ProviderError::Api {
                    status: 429,
                    body: message.clone(),
                }));
                items
            }
            Script::Nothing => Vec::new(),
        };
        stream::iter(items).boxed()
    }
}

/// Blocks every generation until permits are added to `release`, and
/// tracks how many generations run at once.
pub struct GatedProvider {
    pub active: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    pub release: Arc<Semaphore>,
}

impl GatedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            release: Arc::new(Semaphore::new(0)),
        })
    }
}

impl Provider for GatedProvider {
    fn name(&self) -> &str {
        "gated"
    }

    fn validate_params(&self, _: &GenerationRequest) -> Result<(), ProviderError> {
        Ok(())
    }

    fn generate(&self, _: GenerationRequest) -> ImageStream {
        let active = Arc::clone(&self.active);
        let peak = Arc::clone(&self.peak);
        let release = Arc::clone(&self.release);
        stream::once(async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            let _permit = release.acquire().await;
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(image())
        })
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, TaskMessage)>>,
}

impl RecordingNotifier {
    pub fn for_task(&self, task_id: &str) -> Vec<TaskMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == task_id)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl TaskNotifier for RecordingNotifier {
    async fn publish(&self, task_id: &str, message: TaskMessage) {
        self.messages
            .lock()
            .unwrap()
            .push((task_id.to_string(), message));
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<MemoryTaskStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub cancel: CancellationToken,
    pub dir: TempDir,
    runner: Option<JoinHandle<()>>,
}

impl Harness {
    pub fn new(providers: Vec<Arc<dyn Provider>>, worker_count: usize, queue_capacity: usize) -> Self {
        let registry = Arc::new(ProviderRegistry::new(
            Arc::new(MemoryProviderConfigStore::new()),
            ProviderFactory::new(),
            ProvidersConfig::default(),
        ));
        let default_provider = providers
            .first()
            .map(|p| p.name().to_string())
            .unwrap_or_default();
        for provider in providers {
            registry.register(provider);
        }

        let store = Arc::new(MemoryTaskStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Arc::new(Dispatcher::new(
            DispatcherConfig {
                worker_count,
                queue_capacity,
                default_provider,
            },
            store.clone(),
            Arc::new(MemoryProviderConfigStore::new()),
            registry,
            Arc::new(ArtifactStore::new(dir.path(), "/files")),
            notifier.clone(),
        ));

        Self {
            dispatcher,
            store,
            notifier,
            cancel: CancellationToken::new(),
            dir,
            runner: None,
        }
    }

    pub fn start(&mut self) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let cancel = self.cancel.clone();
        self.runner = Some(tokio::spawn(async move { dispatcher.run(cancel).await }));
    }

    /// Cancel the loop and wait for in-flight workers.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(runner) = self.runner.take() {
            runner.await.unwrap();
        }
    }

    /// Poll the store until the task is terminal.
    pub async fn wait_terminal(&self, task_id: &str) -> Task {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(task) = self.store.find(task_id).await.unwrap() {
                    if task.is_terminal() {
                        return task;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("task did not reach a terminal state")
    }
}

pub fn generation(prompt: &str, count: i32) -> NewGeneration {
    NewGeneration {
        prompt: prompt.to_string(),
        count: Some(count),
        ..Default::default()
    }
}
