//! Persisted provider configuration rows.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// A row from the `provider_configs` table.
///
/// `models` holds the raw JSON text of the declared model list. It is
/// parsed leniently by [`ProviderConfig::declared_models`]: malformed JSON
/// reads as "no declared models".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_name: String,
    pub display_name: String,
    #[serde(skip_serializing, default)]
    pub api_key: String,
    pub api_base: String,
    pub enabled: bool,
    pub models: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// One entry of a provider's declared model list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub default: bool,
}

impl ProviderConfig {
    /// Parse the declared model list, treating malformed JSON as empty.
    pub fn declared_models(&self) -> Vec<ModelEntry> {
        parse_models(&self.models)
    }
}

/// Input for inserting a provider configuration row.
#[derive(Debug, Clone, Default)]
pub struct NewProviderConfig {
    pub provider_name: String,
    pub display_name: String,
    pub api_key: String,
    pub api_base: String,
    pub enabled: bool,
    pub models: String,
}

impl NewProviderConfig {
    /// A disabled placeholder row for a built-in provider name.
    pub fn placeholder(name: &str) -> Self {
        Self {
            provider_name: name.to_string(),
            display_name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Field-level update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderConfigPatch {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub models: Option<String>,
    pub enabled: Option<bool>,
}

impl ProviderConfigPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Query parameters for `GET /api/v1/providers`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderFilter {
    pub enabled: Option<bool>,
    /// Case-insensitive substring match on the provider name.
    pub name: Option<String>,
}

impl ProviderFilter {
    pub fn enabled_only() -> Self {
        Self {
            enabled: Some(true),
            name: None,
        }
    }

    pub fn matches(&self, config: &ProviderConfig) -> bool {
        if let Some(enabled) = self.enabled {
            if config.enabled != enabled {
                return false;
            }
        }
        match self.name.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => config
                .provider_name
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            _ => true,
        }
    }
}

/// Parse a JSON model list, returning an empty list on any error.
pub fn parse_models(raw: &str) -> Vec<ModelEntry> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    serde_json::from_str(raw).unwrap_or_default()
}

/// Build the single-entry, default-flagged model list for `model_id`.
///
/// Returns `None` when the id is blank so that callers never overwrite a
/// stored list with an empty one.
pub fn build_models_json(model_id: &str) -> Option<String> {
    let model_id = model_id.trim();
    if model_id.is_empty() {
        return None;
    }
    let entries = [ModelEntry {
        id: model_id.to_string(),
        name: model_id.to_string(),
        default: true,
    }];
    serde_json::to_string(&entries).ok()
}
