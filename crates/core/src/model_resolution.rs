//! Model identifier selection.
//!
//! Given the explicit request model, the free-form request parameters, the
//! provider's stored configuration and the purpose of the call, pick the
//! model id to send to the provider. The first non-blank candidate wins:
//!
//! 1. explicit request model
//! 2. `model_id` parameter
//! 3. `model` parameter
//! 4. configured model list (default-flagged entry, else first entry)
//! 5. built-in default for the provider and purpose

use serde::Serialize;

use crate::provider_config::ProviderConfig;

/// Built-in default for chat calls (and the `openai-chat` provider).
pub const DEFAULT_CHAT_MODEL: &str = "gemini-3-flash-preview";

/// Built-in default for image generation.
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-3-pro-image-preview";

/// Provider name that always resolves to the chat default.
const CHAT_PROVIDER_NAME: &str = "openai-chat";

/// What the resolved model will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelPurpose {
    #[default]
    Image,
    Chat,
}

/// The precedence tier that supplied a resolved model id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    Request,
    ParamsModelId,
    ParamsModel,
    Config,
    Default,
}

impl ModelSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelSource::Request => "request",
            ModelSource::ParamsModelId => "params.model_id",
            ModelSource::ParamsModel => "params.model",
            ModelSource::Config => "config",
            ModelSource::Default => "default",
        }
    }
}

/// Inputs to [`resolve_model_id`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelResolveOptions<'a> {
    pub provider_name: &'a str,
    pub purpose: ModelPurpose,
    pub request_model: Option<&'a str>,
    pub params: Option<&'a serde_json::Map<String, serde_json::Value>>,
    pub config: Option<&'a ProviderConfig>,
}

/// A resolved model id and the tier it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelResolution {
    pub id: String,
    pub source: ModelSource,
}

/// Resolve the model id for a generation call.
///
/// Returns `None` when no tier yields a value; callers must treat that as
/// a configuration error rather than substituting their own default.
pub fn resolve_model_id(opts: &ModelResolveOptions<'_>) -> Option<ModelResolution> {
    if let Some(id) = opts.request_model.and_then(non_blank) {
        return Some(ModelResolution {
            id,
            source: ModelSource::Request,
        });
    }

    if let Some(params) = opts.params {
        if let Some(id) = string_param(params, "model_id") {
            return Some(ModelResolution {
                id,
                source: ModelSource::ParamsModelId,
            });
        }
        if let Some(id) = string_param(params, "model") {
            return Some(ModelResolution {
                id,
                source: ModelSource::ParamsModel,
            });
        }
    }

    if let Some(id) = opts.config.and_then(pick_configured_model) {
        return Some(ModelResolution {
            id,
            source: ModelSource::Config,
        });
    }

    default_model_for_provider(opts.provider_name, opts.purpose).map(|id| ModelResolution {
        id: id.to_string(),
        source: ModelSource::Default,
    })
}

/// Prefer the default-flagged entry, else the first entry with an id.
fn pick_configured_model(config: &ProviderConfig) -> Option<String> {
    let models = config.declared_models();
    models
        .iter()
        .find(|m| m.default && !m.id.trim().is_empty())
        .or_else(|| models.iter().find(|m| !m.id.trim().is_empty()))
        .map(|m| m.id.trim().to_string())
}

/// Built-in fallback keyed by provider name and purpose.
fn default_model_for_provider(provider_name: &str, purpose: ModelPurpose) -> Option<&'static str> {
    let name = provider_name.trim().to_lowercase();
    if purpose == ModelPurpose::Chat || name == CHAT_PROVIDER_NAME {
        return Some(DEFAULT_CHAT_MODEL);
    }
    Some(DEFAULT_IMAGE_MODEL)
}

fn string_param(params: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<String> {
    params.get(key).and_then(|v| v.as_str()).and_then(non_blank)
}

fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
