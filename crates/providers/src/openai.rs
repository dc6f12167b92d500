//! OpenAI-style provider (`/images/generations`).
//!
//! One call requests all `count` images (`n = count`) with base64 output;
//! the returned images are then yielded one by one.

use std::time::Duration;

use futures::{stream, StreamExt};
use imagegen_core::provider_config::ProviderConfig;
use serde::Deserialize;
use serde_json::json;

use crate::provider::{
    ensure_success, normalize_base, require_api_key, GeneratedImage, GenerationRequest,
    ImageStream, Provider, ProviderError,
};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub struct OpenAiProvider {
    name: String,
    http: reqwest::Client,
    api_key: String,
    api_base: String,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = require_api_key(&config.api_key)?;
        let api_base = normalize_base(&config.api_base, DEFAULT_API_BASE)?;
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            name: config.provider_name.clone(),
            http,
            api_key,
            api_base,
        })
    }
}

impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate_params(&self, request: &GenerationRequest) -> Result<(), ProviderError> {
        if !request.reference_images.is_empty() {
            return Err(ProviderError::InvalidParams(
                "reference images are not supported by this provider".to_string(),
            ));
        }
        Ok(())
    }

    fn generate(&self, request: GenerationRequest) -> ImageStream {
        let http = self.http.clone();
        let url = format!("{}/images/generations", self.api_base);
        let api_key = self.api_key.clone();
        let body = request_body(&request);

        let call = async move {
            let response = http
                .post(url)
                .bearer_auth(api_key)
                .json(&body)
                .send()
                .await?;
            let body: ImagesResponse = ensure_success(response).await?.json().await?;
            decode_images(body)
        };

        stream::once(call)
            .flat_map(|result| {
                let items: Vec<Result<GeneratedImage, ProviderError>> = match result {
                    Ok(images) => images.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(items)
            })
            .boxed()
    }
}

/// Map an aspect ratio onto the closest supported output size.
fn size_for(aspect_ratio: Option<&str>) -> &'static str {
    let Some((w, h)) = aspect_ratio.and_then(|r| r.split_once(':')) else {
        return "1024x1024";
    };
    match (w.parse::<u32>(), h.parse::<u32>()) {
        (Ok(w), Ok(h)) if w > h => "1536x1024",
        (Ok(w), Ok(h)) if w < h => "1024x1536",
        _ => "1024x1024",
    }
}

fn request_body(request: &GenerationRequest) -> serde_json::Value {
    let mut body = json!({
        "model": request.model_id,
        "prompt": request.prompt,
        "n": request.count,
        "size": size_for(request.aspect_ratio.as_deref()),
    });
    // dall-e models default to URL output.
    if request.model_id.starts_with("dall-e") {
        body["response_format"] = json!("b64_json");
    }
    if let Some(quality) = request.extra.get("quality").and_then(|v| v.as_str()) {
        body["quality"] = json!(quality);
    }
    body
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
    output_format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

fn decode_images(body: ImagesResponse) -> Result<Vec<GeneratedImage>, ProviderError> {
    let mime_type = match body.output_format.as_deref() {
        Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    };
    body.data
        .iter()
        .filter_map(|d| d.b64_json.as_deref())
        .map(|b64| GeneratedImage::from_base64(b64, mime_type))
        .collect()
}
