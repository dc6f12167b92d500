//! Name-keyed provider constructors.

use std::collections::HashMap;
use std::sync::Arc;

use imagegen_core::provider_config::ProviderConfig;

use crate::gemini::GeminiProvider;
use crate::openai::OpenAiProvider;
use crate::provider::{Provider, ProviderError};

/// Provider names that are seeded into the configuration store at boot.
pub const BUILTIN_PROVIDERS: &[&str] = &["gemini", "openai"];

pub type ProviderConstructor =
    Arc<dyn Fn(&ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> + Send + Sync>;

/// Maps a configuration's `provider_name` to the constructor that builds it.
#[derive(Clone, Default)]
pub struct ProviderFactory {
    constructors: HashMap<String, ProviderConstructor>,
}

impl ProviderFactory {
    /// A factory with no constructors.
    pub fn new() -> Self {
        Self::default()
    }

    /// The bundled Gemini and OpenAI constructors.
    pub fn builtin() -> Self {
        Self::new()
            .with_constructor("gemini", |config| {
                Ok(Arc::new(GeminiProvider::new(config)?) as Arc<dyn Provider>)
            })
            .with_constructor("openai", |config| {
                Ok(Arc::new(OpenAiProvider::new(config)?) as Arc<dyn Provider>)
            })
    }

    pub fn with_constructor<F>(mut self, name: &str, constructor: F) -> Self
    where
        F: Fn(&ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> + Send + Sync + 'static,
    {
        self.constructors
            .insert(name.to_string(), Arc::new(constructor));
        self
    }

    /// Build the provider for `config`.
    ///
    /// Returns `None` when no constructor is registered for the name.
    pub fn build(
        &self,
        config: &ProviderConfig,
    ) -> Option<Result<Arc<dyn Provider>, ProviderError>> {
        self.constructors
            .get(&config.provider_name)
            .map(|construct| construct(config))
    }

    pub fn knows(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }
}
