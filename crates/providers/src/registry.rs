//! Live provider registry.
//!
//! The registry holds an immutable snapshot map of constructed providers.
//! Readers clone the snapshot `Arc`; writers build a new map and swap it in
//! whole, so a lookup never observes a half-rebuilt registry.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use imagegen_core::error::StoreError;
use imagegen_core::ports::ProviderConfigStore;
use imagegen_core::provider_config::{NewProviderConfig, ProviderFilter};
use tokio::sync::Mutex;

use crate::factory::{ProviderFactory, BUILTIN_PROVIDERS};
use crate::provider::Provider;
use crate::settings::ProvidersConfig;

type Snapshot = Arc<HashMap<String, Arc<dyn Provider>>>;

#[derive(Debug, thiserror::Error)]
pub enum ProviderRegistryError {
    #[error("failed to list provider configurations: {0}")]
    Store(#[from] StoreError),
}

/// A provider that was enabled but could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedProvider {
    pub name: String,
    pub reason: String,
}

/// Outcome of a [`ProviderRegistry::reload`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    /// Names now live, sorted.
    pub loaded: Vec<String>,
    pub skipped: Vec<SkippedProvider>,
}

pub struct ProviderRegistry {
    providers: RwLock<Snapshot>,
    /// Serializes reloads.
    reload_lock: Mutex<()>,
    store: Arc<dyn ProviderConfigStore>,
    factory: ProviderFactory,
    settings: ProvidersConfig,
}

impl ProviderRegistry {
    /// An empty registry. Call [`reload`](Self::reload) to populate it.
    pub fn new(
        store: Arc<dyn ProviderConfigStore>,
        factory: ProviderFactory,
        settings: ProvidersConfig,
    ) -> Self {
        Self {
            providers: RwLock::new(Arc::new(HashMap::new())),
            reload_lock: Mutex::new(()),
            store,
            factory,
            settings,
        }
    }

    fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.providers.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn swap(&self, next: Snapshot) {
        *self.providers.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Insert or replace a provider under its own name.
    pub fn register(&self, provider: Arc<dyn Provider>) {
        let mut guard = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = (**guard).clone();
        next.insert(provider.name().to_string(), provider);
        *guard = Arc::new(next);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.snapshot().get(name).cloned()
    }

    /// Live provider names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.snapshot().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuild the registry from the configuration store.
    ///
    /// Seeds missing built-in rows (disabled), merges external settings,
    /// constructs every enabled provider, then swaps the result in. A
    /// provider that fails to construct is skipped; a failure to list the
    /// enabled rows aborts and keeps the previous snapshot.
    pub async fn reload(&self) -> Result<ReloadSummary, ProviderRegistryError> {
        let _guard = self.reload_lock.lock().await;

        self.seed_builtins().await;
        self.merge_settings().await;

        let configs = self.store.list(&ProviderFilter::enabled_only()).await?;

        let mut next: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        let mut summary = ReloadSummary::default();
        for config in &configs {
            match self.factory.build(config) {
                None => {
                    tracing::warn!(provider = %config.provider_name, "Unknown provider type, skipping");
                    summary.skipped.push(SkippedProvider {
                        name: config.provider_name.clone(),
                        reason: "unknown provider type".to_string(),
                    });
                }
                Some(Err(e)) => {
                    tracing::error!(provider = %config.provider_name, error = %e, "Failed to construct provider");
                    summary.skipped.push(SkippedProvider {
                        name: config.provider_name.clone(),
                        reason: e.to_string(),
                    });
                }
                Some(Ok(provider)) => {
                    tracing::info!(
                        provider = %config.provider_name,
                        api_base = %config.api_base,
                        "Provider loaded",
                    );
                    next.insert(config.provider_name.clone(), provider);
                }
            }
        }

        summary.loaded = next.keys().cloned().collect();
        summary.loaded.sort();
        self.swap(Arc::new(next));

        tracing::info!(
            loaded = summary.loaded.len(),
            skipped = summary.skipped.len(),
            "Provider registry reloaded",
        );
        Ok(summary)
    }

    async fn seed_builtins(&self) {
        for name in BUILTIN_PROVIDERS {
            match self.store.find(name).await {
                Ok(Some(_)) => {}
                Ok(None) => match self.store.insert(&NewProviderConfig::placeholder(name)).await {
                    Ok(_) => tracing::debug!(provider = %name, "Seeded provider configuration"),
                    Err(StoreError::AlreadyExists { .. }) => {}
                    Err(e) => tracing::warn!(provider = %name, error = %e, "Failed to seed provider"),
                },
                Err(e) => tracing::warn!(provider = %name, error = %e, "Failed to look up provider"),
            }
        }
    }

    async fn merge_settings(&self) {
        for settings in self.settings.actionable() {
            let result = match self.store.find(&settings.name).await {
                Ok(None) => self.store.insert(&settings.new_config()).await.map(|_| "created"),
                Ok(Some(_)) => self
                    .store
                    .update(&settings.name, &settings.patch())
                    .await
                    .map(|_| "updated"),
                Err(e) => Err(e),
            };
            match result {
                Ok(action) => {
                    tracing::info!(provider = %settings.name, action, "Applied external provider settings")
                }
                Err(e) => {
                    tracing::warn!(provider = %settings.name, error = %e, "Failed to apply provider settings")
                }
            }
        }
    }
}
