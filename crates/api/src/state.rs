use std::sync::Arc;

use imagegen_core::ports::{ProviderConfigStore, TaskStore};
use imagegen_pipeline::Dispatcher;
use imagegen_providers::ProviderRegistry;

use crate::config::ServerConfig;
use crate::ws::TaskSubscribers;

/// Shared application state available to all handlers via Axum's `State`
/// extractor.
///
/// Cheap to clone: every field is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Task records.
    pub tasks: Arc<dyn TaskStore>,
    /// Provider configuration rows.
    pub provider_configs: Arc<dyn ProviderConfigStore>,
    /// Live provider instances.
    pub registry: Arc<ProviderRegistry>,
    /// Admission queue and worker pool.
    pub dispatcher: Arc<Dispatcher>,
    /// WebSocket subscribers keyed by task id.
    pub subscribers: Arc<TaskSubscribers>,
}
