//! Gemini-style provider (`models/{model}:generateContent`).
//!
//! The API returns at most one image per call, so a request for `count`
//! images issues `count` sequential calls and yields each image as soon as
//! its call returns.

use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use imagegen_core::provider_config::ProviderConfig;
use serde::Deserialize;
use serde_json::json;

use crate::provider::{
    ensure_success, normalize_base, require_api_key, GeneratedImage, GenerationRequest,
    ImageStream, Provider, ProviderError,
};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

pub struct GeminiProvider {
    name: String,
    inner: Arc<Client>,
}

struct Client {
    http: reqwest::Client,
    api_key: String,
    api_base: reqwest::Url,
}

impl GeminiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = require_api_key(&config.api_key)?;
        let api_base = normalize_base(&config.api_base, DEFAULT_API_BASE)?;
        let api_base = reqwest::Url::parse(&api_base)
            .map_err(|e| ProviderError::Configuration(format!("invalid API base: {e}")))?;
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            name: config.provider_name.clone(),
            inner: Arc::new(Client {
                http,
                api_key,
                api_base,
            }),
        })
    }
}

impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate_params(&self, request: &GenerationRequest) -> Result<(), ProviderError> {
        if let Some(img) = request
            .reference_images
            .iter()
            .find(|img| !img.mime_type.starts_with("image/"))
        {
            return Err(ProviderError::InvalidParams(format!(
                "reference image has unsupported type '{}'",
                img.mime_type
            )));
        }
        Ok(())
    }

    fn generate(&self, request: GenerationRequest) -> ImageStream {
        let client = Arc::clone(&self.inner);
        let request = Arc::new(request);
        stream::iter(0..request.count.max(0))
            .then(move |_| {
                let client = Arc::clone(&client);
                let request = Arc::clone(&request);
                async move { client.generate_one(&request).await }
            })
            .boxed()
    }
}

impl Client {
    async fn generate_one(&self, request: &GenerationRequest) -> Result<GeneratedImage, ProviderError> {
        let url = self.endpoint(&request.model_id)?;
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(request))
            .send()
            .await?;
        let body: GenerateContentResponse = ensure_success(response).await?.json().await?;
        first_image(body)
    }

    /// `{base}/v1beta/models/{model}:generateContent`, with the model id
    /// percent-encoded as a single path segment.
    fn endpoint(&self, model_id: &str) -> Result<reqwest::Url, ProviderError> {
        let method = format!("{model_id}:generateContent");
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|()| ProviderError::Configuration("API base cannot carry a path".into()))?
            .pop_if_empty()
            .extend(["v1beta", "models", method.as_str()]);
        Ok(url)
    }
}

fn request_body(request: &GenerationRequest) -> serde_json::Value {
    let mut parts = vec![json!({ "text": request.prompt })];
    parts.extend(request.reference_images.iter().map(|img| {
        json!({ "inlineData": { "mimeType": img.mime_type, "data": img.data } })
    }));

    let mut generation_config = json!({ "responseModalities": ["TEXT", "IMAGE"] });
    if let Some(ratio) = &request.aspect_ratio {
        generation_config["imageConfig"] = json!({ "aspectRatio": ratio });
    }
    if let Some(size) = request.extra.get("image_size").and_then(|v| v.as_str()) {
        generation_config["imageConfig"]["imageSize"] = json!(size);
    }

    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": generation_config,
    })
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

fn first_image(body: GenerateContentResponse) -> Result<GeneratedImage, ProviderError> {
    body.candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .find_map(|p| p.inline_data)
        .ok_or(ProviderError::EmptyResponse)
        .and_then(|d| GeneratedImage::from_base64(&d.data, &d.mime_type))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use imagegen_core::task::ReferenceImage;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    fn config(key: &str, base: &str) -> ProviderConfig {
        let now = chrono::Utc::now();
        ProviderConfig {
            provider_name: "gemini".into(),
            display_name: "Gemini".into(),
            api_key: key.into(),
            api_base: base.into(),
            enabled: true,
            models: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    // Opaque Debug so `assert_matches!` can format construction results.
    impl std::fmt::Debug for GeminiProvider {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("GeminiProvider").finish_non_exhaustive()
        }
    }

    #[test]
    fn construction_requires_key_and_http_base() {
        assert!(GeminiProvider::new(&config("k", "")).is_ok());
        assert_matches!(
            GeminiProvider::new(&config("", "")),
            Err(ProviderError::Configuration(_))
        );
        assert_matches!(
            GeminiProvider::new(&config("k", "grpc://x")),
            Err(ProviderError::Configuration(_))
        );
    }

    #[test]
    fn body_carries_prompt_references_and_ratio() {
        let request = GenerationRequest {
            model_id: "m".into(),
            prompt: "a fox".into(),
            aspect_ratio: Some("16:9".into()),
            count: 1,
            reference_images: vec![ReferenceImage {
                mime_type: "image/png".into(),
                data: "AAAA".into(),
            }],
            extra: Default::default(),
        };
        let body = request_body(&request);
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "a fox");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(body["generationConfig"]["imageConfig"]["aspectRatio"], "16:9");
    }

    #[test]
    fn response_without_inline_data_is_empty() {
        let body: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [{ "text": "sorry" }] } }]
        }))
        .unwrap();
        assert_matches!(first_image(body), Err(ProviderError::EmptyResponse));
    }

    #[test]
    fn first_inline_image_is_returned() {
        let body: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [
                { "text": "here you go" },
                { "inlineData": { "mimeType": "image/png", "data": "aGk=" } }
            ] } }]
        }))
        .unwrap();
        let img = first_image(body).unwrap();
        assert_eq!(img.bytes, b"hi");
        assert_eq!(img.mime_type, "image/png");
    }

    #[test]
    fn non_image_reference_rejected() {
        let provider = GeminiProvider::new(&config("k", "")).unwrap();
        let request = GenerationRequest {
            reference_images: vec![ReferenceImage {
                mime_type: "text/plain".into(),
                data: "AAAA".into(),
            }],
            ..Default::default()
        };
        assert_matches!(
            provider.validate_params(&request),
            Err(ProviderError::InvalidParams(_))
        );
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let provider = GeminiProvider::new(&config("k", "http://localhost:9000/proxy/")).unwrap();
        let url = provider.inner.endpoint("gemini-3-pro-image-preview").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:9000/proxy/v1beta/models/gemini-3-pro-image-preview:generateContent"
        );
    }

    /// Accept one HTTP request, answer 500 with `body`, and return the
    /// request line.
    async fn serve_one_error(listener: TcpListener, body: &'static str) -> String {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            received.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&received);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if received.len() >= end + 4 + length {
                    break;
                }
            }
            if n == 0 {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 500 Internal Server Error\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        String::from_utf8_lossy(&received)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string()
    }

    #[tokio::test]
    async fn hostile_model_id_stays_inside_its_segment() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_one_error(listener, "secret"));

        let provider = GeminiProvider::new(&config("k", &format!("http://{addr}"))).unwrap();
        let request = GenerationRequest {
            model_id: "../../v1/admin/delete?x=".into(),
            prompt: "p".into(),
            count: 1,
            ..Default::default()
        };
        let result = provider.generate(request).next().await.unwrap();
        let request_line = server.await.unwrap();

        assert!(request_line.starts_with("POST /v1beta/models/"), "{request_line}");
        assert!(!request_line.contains("/v1/admin"), "{request_line}");
        assert!(!request_line.contains('?'), "{request_line}");
        assert_matches!(
            result,
            Err(ProviderError::Api { status: 500, body }) if !body.contains("secret")
        );
    }
}
