//! Shared fixtures for API integration tests.
//!
//! The application is assembled exactly as in `main.rs`, but over the
//! in-memory stores and scripted providers instead of PostgreSQL and real
//! upstream APIs.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use futures::{stream, StreamExt};
use http_body_util::BodyExt;
use imagegen_api::config::ServerConfig;
use imagegen_api::router::build_app_router;
use imagegen_api::state::AppState;
use imagegen_api::ws::TaskSubscribers;
use imagegen_core::ports::TaskStore;
use imagegen_db::memory::{MemoryProviderConfigStore, MemoryTaskStore};
use imagegen_pipeline::{ArtifactStore, Dispatcher};
use imagegen_providers::{
    GeneratedImage, GenerationRequest, ImageStream, Provider, ProviderError, ProviderFactory,
    ProviderRegistry, ProvidersConfig,
};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

pub fn image() -> GeneratedImage {
    GeneratedImage {
        bytes: b"fake image bytes".to_vec(),
        mime_type: "image/png".into(),
    }
}

/// Yields `count` images, or fails with a 429 carrying `error` after
/// yielding nothing. Generation waits on `gate` when one is set.
pub struct ScriptedProvider {
    pub name: String,
    pub error: Option<String>,
    pub gate: Option<Arc<Semaphore>>,
}

impl ScriptedProvider {
    pub fn succeeding(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            error: None,
            gate: None,
        })
    }

    pub fn failing(name: &str, error: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            error: Some(error.to_string()),
            gate: None,
        })
    }

    pub fn gated(name: &str, gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            error: None,
            gate: Some(gate),
        })
    }
}

impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate_params(&self, _: &GenerationRequest) -> Result<(), ProviderError> {
        Ok(())
    }

    fn generate(&self, request: GenerationRequest) -> ImageStream {
        let error = self.error.clone();
        let gate = self.gate.clone();
        stream::once(async move {
            if let Some(gate) = gate {
                let _permit = gate.acquire().await;
            }
            let items: Vec<Result<GeneratedImage, ProviderError>> = match error {
                Some(body) => vec![Err(ProviderError::Api { status: 429, body })],
                None => (0..request.count).map(|_| Ok(image())).collect(),
            };
            stream::iter(items)
        })
        .flatten()
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config(storage_dir: &std::path::Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        worker_count: 2,
        queue_capacity: 10,
        storage_dir: storage_dir.to_path_buf(),
        public_files_url: "/files".to_string(),
        default_provider: "mock".to_string(),
        ws_poll_interval: Duration::from_secs(1),
        ws_ping_interval: Duration::from_secs(30),
        ws_pong_timeout: Duration::from_secs(60),
    }
}

pub struct TestApp {
    pub state: AppState,
    pub tasks: Arc<MemoryTaskStore>,
    pub provider_configs: Arc<MemoryProviderConfigStore>,
    pub router: Router,
    pub cancel: CancellationToken,
    pub dir: TempDir,
    runner: Option<JoinHandle<()>>,
}

impl TestApp {
    /// An application whose dispatcher is running.
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        let mut app = Self::idle(providers, 10);
        app.start();
        app
    }

    /// An application whose dispatcher is not running: admitted tasks stay
    /// `queued` until [`start`](Self::start).
    pub fn idle(providers: Vec<Arc<dyn Provider>>, queue_capacity: usize) -> Self {
        Self::configured(providers, |config| config.queue_capacity = queue_capacity)
    }

    /// Like [`idle`](Self::idle), with `configure` applied to the test
    /// configuration first.
    pub fn configured(
        providers: Vec<Arc<dyn Provider>>,
        configure: impl FnOnce(&mut ServerConfig),
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        configure(&mut config);

        let tasks = Arc::new(MemoryTaskStore::new());
        let provider_configs = Arc::new(MemoryProviderConfigStore::new());
        let registry = Arc::new(ProviderRegistry::new(
            provider_configs.clone(),
            ProviderFactory::new(),
            ProvidersConfig::default(),
        ));
        for provider in providers {
            registry.register(provider);
        }

        let subscribers = Arc::new(TaskSubscribers::new());
        let dispatcher = Arc::new(Dispatcher::new(
            config.dispatcher_config(),
            tasks.clone(),
            provider_configs.clone(),
            Arc::clone(&registry),
            Arc::new(ArtifactStore::new(dir.path(), &config.public_files_url)),
            subscribers.clone(),
        ));

        let state = AppState {
            config: Arc::new(config.clone()),
            tasks: tasks.clone(),
            provider_configs: provider_configs.clone(),
            registry,
            dispatcher,
            subscribers,
        };
        let router = build_app_router(state.clone(), &config);

        Self {
            state,
            tasks,
            provider_configs,
            router,
            cancel: CancellationToken::new(),
            dir,
            runner: None,
        }
    }

    pub fn start(&mut self) {
        let dispatcher = Arc::clone(&self.state.dispatcher);
        let cancel = self.cancel.clone();
        self.runner = Some(tokio::spawn(async move { dispatcher.run(cancel).await }));
    }

    /// Serve the router on an ephemeral local port.
    pub async fn serve(&self) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = self.router.clone();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    /// Poll the store until the task is terminal.
    pub async fn wait_terminal(&self, task_id: &str) -> imagegen_core::task::Task {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if let Some(task) = self.tasks.find(task_id).await.unwrap() {
                    if task.is_terminal() {
                        return task;
                    }
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("task did not reach a terminal state")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    post_raw_json(app, uri, body.to_string()).await
}

/// POST `body` verbatim with a JSON content type.
pub async fn post_raw_json(app: Router, uri: &str, body: String) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Assert the status and return the parsed body.
pub async fn expect_json(response: Response<Body>, status: StatusCode) -> serde_json::Value {
    assert_eq!(response.status(), status);
    body_json(response).await
}
