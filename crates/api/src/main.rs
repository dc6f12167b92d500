use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use imagegen_api::config::ServerConfig;
use imagegen_api::router::build_app_router;
use imagegen_api::state::AppState;
use imagegen_api::ws::TaskSubscribers;
use imagegen_core::ports::{ProviderConfigStore, TaskStore};
use imagegen_db::{PgProviderConfigStore, PgTaskStore};
use imagegen_pipeline::{ArtifactStore, Dispatcher};
use imagegen_providers::{ProviderFactory, ProviderRegistry, ProvidersConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "imagegen_api=debug,imagegen_pipeline=debug,imagegen_providers=debug,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        worker_count = config.worker_count,
        queue_capacity = config.queue_capacity,
        "Loaded server configuration",
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = imagegen_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    imagegen_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    imagegen_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    let tasks: Arc<dyn TaskStore> = Arc::new(PgTaskStore::new(pool.clone()));
    let provider_configs: Arc<dyn ProviderConfigStore> =
        Arc::new(PgProviderConfigStore::new(pool));

    // --- Provider registry ---
    let registry = Arc::new(ProviderRegistry::new(
        Arc::clone(&provider_configs),
        ProviderFactory::builtin(),
        ProvidersConfig::from_env(),
    ));
    match registry.reload().await {
        Ok(summary) => tracing::info!(
            loaded = ?summary.loaded,
            skipped = summary.skipped.len(),
            "Provider registry loaded",
        ),
        Err(e) => tracing::error!(error = %e, "Initial provider load failed"),
    }
    let reload_handle = spawn_reload_on_hangup(Arc::clone(&registry));

    // --- Storage ---
    tokio::fs::create_dir_all(&config.storage_dir)
        .await
        .expect("Failed to create storage directory");
    let artifacts = Arc::new(ArtifactStore::new(
        config.storage_dir.clone(),
        &config.public_files_url,
    ));

    // --- Dispatcher ---
    let subscribers = Arc::new(TaskSubscribers::new());
    let dispatcher = Arc::new(Dispatcher::new(
        config.dispatcher_config(),
        Arc::clone(&tasks),
        Arc::clone(&provider_configs),
        Arc::clone(&registry),
        artifacts,
        subscribers.clone(),
    ));

    dispatcher
        .recover()
        .await
        .expect("Failed to recover tasks from previous run");

    let dispatcher_cancel = CancellationToken::new();
    let dispatcher_handle = {
        let dispatcher = Arc::clone(&dispatcher);
        let cancel = dispatcher_cancel.clone();
        tokio::spawn(async move { dispatcher.run(cancel).await })
    };

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        tasks,
        provider_configs,
        registry,
        dispatcher,
        subscribers: Arc::clone(&subscribers),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Stop claiming; in-flight workers run to completion.
    dispatcher_cancel.cancel();
    let drain = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(drain, dispatcher_handle).await.is_err() {
        tracing::warn!(
            timeout_secs = config.shutdown_timeout_secs,
            "In-flight tasks did not finish before the shutdown timeout",
        );
    }
    tracing::info!("Dispatcher stopped");

    let subscriptions = subscribers.connection_count().await;
    tracing::info!(subscriptions, "Closing remaining task subscriptions");
    subscribers.shutdown_all().await;

    if let Some(handle) = reload_handle {
        handle.abort();
    }

    tracing::info!("Graceful shutdown complete");
}

/// Reload the provider registry on every SIGHUP.
#[cfg(unix)]
fn spawn_reload_on_hangup(registry: Arc<ProviderRegistry>) -> Option<tokio::task::JoinHandle<()>> {
    let mut hangup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        .expect("Failed to install SIGHUP handler");

    Some(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("Received SIGHUP, reloading providers");
            match registry.reload().await {
                Ok(summary) => tracing::info!(
                    loaded = ?summary.loaded,
                    skipped = summary.skipped.len(),
                    "Provider registry reloaded",
                ),
                Err(e) => tracing::error!(error = %e, "Provider reload failed, keeping previous set"),
            }
        }
    }))
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_registry: Arc<ProviderRegistry>) -> Option<tokio::task::JoinHandle<()>> {
    None
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
