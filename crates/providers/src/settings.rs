//! Externally supplied provider settings.
//!
//! Read from the environment once, when the registry is built, and merged
//! into the configuration store again at every registry reload. Entries
//! that carry an API key or an explicit enable flag win over stored values,
//! so a reload re-applies them over any edit made to the store in between.

use imagegen_core::provider_config::{build_models_json, NewProviderConfig, ProviderConfigPatch};

use crate::factory::BUILTIN_PROVIDERS;

/// Settings for one provider name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderSettings {
    pub name: String,
    pub api_key: String,
    pub api_base: String,
    pub model_id: String,
    pub enabled: bool,
}

impl ProviderSettings {
    /// Only entries with a key or an explicit enable are merged.
    pub fn is_actionable(&self) -> bool {
        !self.api_key.trim().is_empty() || self.enabled
    }

    /// Row to insert when the store has no entry for this name.
    pub fn new_config(&self) -> NewProviderConfig {
        NewProviderConfig {
            provider_name: self.name.clone(),
            display_name: self.name.clone(),
            api_key: self.api_key.trim().to_string(),
            api_base: self.api_base.trim().to_string(),
            enabled: true,
            models: build_models_json(&self.model_id).unwrap_or_default(),
        }
    }

    /// Update for an existing row: non-empty fields only, always enabled.
    pub fn patch(&self) -> ProviderConfigPatch {
        ProviderConfigPatch {
            api_key: non_empty(&self.api_key),
            api_base: non_empty(&self.api_base),
            models: build_models_json(&self.model_id),
            enabled: Some(true),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// All externally supplied provider settings.
#[derive(Debug, Clone, Default)]
pub struct ProvidersConfig {
    pub entries: Vec<ProviderSettings>,
}

impl ProvidersConfig {
    /// Load settings for the built-in providers from environment variables.
    ///
    /// | Env Var           | Meaning                          |
    /// |-------------------|----------------------------------|
    /// | `<NAME>_API_KEY`  | API key                          |
    /// | `<NAME>_API_BASE` | Base URL override                |
    /// | `<NAME>_MODEL_ID` | Default model id                 |
    /// | `<NAME>_ENABLED`  | `true`/`1` force-enables the row |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let entries = BUILTIN_PROVIDERS
            .iter()
            .map(|name| {
                let prefix = name.to_uppercase();
                let var = |suffix: &str| lookup(&format!("{prefix}_{suffix}")).unwrap_or_default();
                ProviderSettings {
                    name: name.to_string(),
                    api_key: var("API_KEY"),
                    api_base: var("API_BASE"),
                    model_id: var("MODEL_ID"),
                    enabled: matches!(
                        var("ENABLED").trim().to_ascii_lowercase().as_str(),
                        "true" | "1" | "yes"
                    ),
                }
            })
            .collect();
        Self { entries }
    }

    pub fn actionable(&self) -> impl Iterator<Item = &ProviderSettings> {
        self.entries.iter().filter(|s| s.is_actionable())
    }
}
