//! The provider capability and its request/response types.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::stream::BoxStream;
use imagegen_core::task::{ReferenceImage, Task};

/// Stream of produced images. Each item is one finished output.
pub type ImageStream = BoxStream<'static, Result<GeneratedImage, ProviderError>>;

/// An image-generation backend.
///
/// Implementations are constructed from a stored provider configuration by
/// the [`ProviderFactory`](crate::ProviderFactory) and shared behind an
/// `Arc` by the registry.
pub trait Provider: Send + Sync {
    /// Registry key, equal to the configuration's `provider_name`.
    fn name(&self) -> &str;

    /// Reject requests this backend cannot serve before a task is created.
    fn validate_params(&self, request: &GenerationRequest) -> Result<(), ProviderError>;

    /// Start generating `request.count` images.
    fn generate(&self, request: GenerationRequest) -> ImageStream;
}

/// Everything a provider needs to produce images for one task.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub model_id: String,
    pub prompt: String,
    pub aspect_ratio: Option<String>,
    pub count: i32,
    pub reference_images: Vec<ReferenceImage>,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl GenerationRequest {
    pub fn from_task(task: &Task) -> Self {
        Self {
            model_id: task.model_id.clone(),
            prompt: task.prompt.clone(),
            aspect_ratio: task.params.aspect_ratio.clone(),
            count: task.total_count,
            reference_images: task.params.reference_images.clone(),
            extra: task.params.extra.clone(),
        }
    }
}

/// One produced image as raw encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl GeneratedImage {
    /// Decode a base64 payload as returned by the JSON APIs.
    pub fn from_base64(data: &str, mime_type: &str) -> Result<Self, ProviderError> {
        let bytes = STANDARD
            .decode(data.trim())
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        if bytes.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(Self {
            bytes,
            mime_type: mime_type.to_string(),
        })
    }

    /// File extension for the image's MIME type.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            _ => "png",
        }
    }
}

/// Errors from provider construction and generation calls.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The stored configuration cannot produce a working client.
    #[error("provider configuration error: {0}")]
    Configuration(String),

    #[error("invalid generation parameters: {0}")]
    InvalidParams(String),

    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("provider API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("provider returned no image")]
    EmptyResponse,

    #[error("could not decode provider response: {0}")]
    Decode(String),
}

/// Check that a base URL is usable, returning it without a trailing slash.
pub(crate) fn normalize_base(raw: &str, default: &str) -> Result<String, ProviderError> {
    let base = raw.trim();
    let base = if base.is_empty() { default } else { base };
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(ProviderError::Configuration(format!(
            "API base must be an http(s) URL, got '{base}'"
        )));
    }
    Ok(base.trim_end_matches('/').to_string())
}

pub(crate) fn require_api_key(raw: &str) -> Result<String, ProviderError> {
    let key = raw.trim();
    if key.is_empty() {
        return Err(ProviderError::Configuration("API key is empty".to_string()));
    }
    Ok(key.to_string())
}

/// Longest upstream error text kept in a [`ProviderError::Api`].
const MAX_ERROR_EXCERPT: usize = 200;

/// Return the response unchanged on success, or an
/// [`ProviderError::Api`] carrying the status and a short error excerpt.
///
/// Only the `error.message` field of a JSON error body is kept. The raw
/// body goes to the debug log and never into the error.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let raw = response.text().await.unwrap_or_default();
    tracing::debug!(status = status.as_u16(), body = %raw, "Provider API error body");
    Err(ProviderError::Api {
        status: status.as_u16(),
        body: error_excerpt(status, &raw),
    })
}

fn error_excerpt(status: reqwest::StatusCode, raw: &str) -> String {
    let message = serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| v.pointer("/error/message")?.as_str().map(|m| m.trim().to_string()))
        .filter(|m| !m.is_empty());
    match message {
        Some(m) => m.chars().take(MAX_ERROR_EXCERPT).collect(),
        None => status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string(),
    }
}
