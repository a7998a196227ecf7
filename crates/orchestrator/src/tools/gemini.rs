//! Gemini REST backend for text generation (optionally grounded with Google
//! Search) and Imagen image generation.

use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{
    Citation, ImageGenerator, ImageRequest, TextGenerator, TextRequest, TextResponse, ToolError,
};
use crate::artifacts::write_atomic;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-pro";
pub const DEFAULT_IMAGE_MODEL: &str = "imagen-4.0-ultra-generate-001";

/// Client for the Gemini API
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    text_model: String,
    image_model: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_text_model(mut self, model: impl Into<String>) -> Self {
        self.text_model = normalize_model(model.into());
        self
    }

    pub fn with_image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = normalize_model(model.into());
        self
    }

    pub fn text_model(&self) -> &str {
        &self.text_model
    }

    pub fn image_model(&self) -> &str {
        &self.image_model
    }

    async fn post(&self, url: String, body: &serde_json::Value) -> Result<reqwest::Response, ToolError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            warn!(status = status.as_u16(), "Gemini API error: {}", message);
            return Err(ToolError::from_status(status.as_u16(), &message));
        }
        Ok(response)
    }
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("text_model", &self.text_model)
            .field("image_model", &self.image_model)
            .finish()
    }
}

/// Read the whole body, then decode it. A body cut off mid-transfer is
/// classified like any other transport error; a body that arrives but does
/// not parse is permanent.
async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
    operation: &str,
) -> Result<T, ToolError> {
    let bytes = response.bytes().await.map_err(ToolError::from)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ToolError::permanent(format!("malformed {} response: {}", operation, e)))
}

/// Accept `gemini/gemini-2.5-pro` style names as well as bare model ids.
fn normalize_model(model: String) -> String {
    match model.rsplit_once('/') {
        Some((_, bare)) if !bare.is_empty() => bare.to_string(),
        _ => model,
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate_text(&self, request: &TextRequest) -> Result<TextResponse, ToolError> {
        debug!(
            model = %self.text_model,
            grounding = request.grounding,
            prompt_length = request.prompt.len(),
            "Generating text"
        );

        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        });
        if request.grounding {
            body["tools"] = json!([{ "google_search": {} }]);
        }

        let url = format!("{}/models/{}:generateContent", self.base_url, self.text_model);
        let response: GenerateContentResponse =
            read_json(self.post(url, &body).await?, "generateContent").await?;

        if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(ToolError::permanent(format!("prompt blocked: {}", reason)));
        }

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ToolError::permanent("response contains no candidates"))?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".to_string());
            return Err(ToolError::permanent(format!(
                "empty response (finish reason: {})",
                reason
            )));
        }

        let citations = candidate
            .grounding_metadata
            .map(|m| {
                m.grounding_chunks
                    .into_iter()
                    .filter_map(|c| c.web)
                    .map(|w| Citation {
                        title: w.title.unwrap_or_else(|| w.uri.clone()),
                        uri: w.uri,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(TextResponse { text, citations })
    }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
    async fn generate_image(&self, request: &ImageRequest) -> Result<PathBuf, ToolError> {
        debug!(
            model = %self.image_model,
            aspect_ratio = %request.aspect_ratio,
            destination = %request.destination.display(),
            "Generating image"
        );

        let body = json!({
            "instances": [{ "prompt": request.prompt }],
            "parameters": {
                "sampleCount": 1,
                "aspectRatio": request.aspect_ratio.as_str(),
                "imageSize": request.resolution.as_str(),
            },
        });

        let url = format!("{}/models/{}:predict", self.base_url, self.image_model);
        let response: PredictResponse = read_json(self.post(url, &body).await?, "predict").await?;

        let encoded = response
            .predictions
            .into_iter()
            .find_map(|p| p.bytes_base64_encoded)
            .ok_or_else(|| ToolError::permanent("no image generated (filtered or empty response)"))?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| ToolError::permanent(format!("invalid image payload: {}", e)))?;

        write_atomic(&request.destination, &bytes)
            .await
            .map_err(|e| ToolError::permanent(e.to_string()))?;

        Ok(request.destination.clone())
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    web: Option<WebSource>,
}

#[derive(Debug, Deserialize)]
struct WebSource {
    uri: String,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ImageResolution, ToolErrorKind};
    use carousel_core::AspectRatio;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GeminiClient {
        GeminiClient::new("test-key")
            .with_base_url(server.uri())
            .with_text_model("gemini/gemini-2.5-pro")
    }

    #[test]
    fn test_normalize_model() {
        assert_eq!(normalize_model("gemini/gemini-2.5-pro".into()), "gemini-2.5-pro");
        assert_eq!(normalize_model("gemini-2.5-flash".into()), "gemini-2.5-flash");
    }

    #[tokio::test]
    async fn test_grounded_text_with_citations() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.5-pro:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({ "tools": [{ "google_search": {} }] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "{\"findings\": " }, { "text": "[]}" }] },
                    "finishReason": "STOP",
                    "groundingMetadata": {
                        "groundingChunks": [
                            { "web": { "uri": "https://iea.org/report", "title": "IEA" } },
                            { "web": { "uri": "https://example.org" } }
                        ]
                    }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = client(&server)
            .generate_text(&TextRequest {
                prompt: "Research batteries".to_string(),
                grounding: true,
            })
            .await
            .unwrap();

        assert_eq!(response.text, "{\"findings\": []}");
        assert_eq!(response.citations.len(), 2);
        assert_eq!(response.citations[0].title, "IEA");
        assert_eq!(response.citations[1].title, "https://example.org");
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": { "message": "Resource has been exhausted" }
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .generate_text(&TextRequest {
                prompt: "x".to_string(),
                grounding: false,
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, ToolErrorKind::Transient);
        assert!(err.message.contains("Resource has been exhausted"));
    }

    /// Serve one request with a 200 whose body stops short of its declared
    /// length, then close the connection.
    async fn truncating_server() -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
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
                    if request.len() >= end + 4 + length || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 500\r\n\r\n{\"candidates\": [",
                )
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_truncated_body_is_transient() {
        let base_url = truncating_server().await;
        let err = GeminiClient::new("test-key")
            .with_base_url(base_url)
            .generate_text(&TextRequest {
                prompt: "x".to_string(),
                grounding: false,
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, ToolErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_unparseable_body_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&server)
            .await;

        let err = client(&server)
            .generate_text(&TextRequest {
                prompt: "x".to_string(),
                grounding: false,
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, ToolErrorKind::Permanent);
        assert!(err.message.contains("malformed generateContent response"));
    }

    #[tokio::test]
    async fn test_blocked_prompt_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [],
                "promptFeedback": { "blockReason": "SAFETY" }
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .generate_text(&TextRequest {
                prompt: "x".to_string(),
                grounding: false,
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, ToolErrorKind::Permanent);
        assert!(err.message.contains("SAFETY"));
    }

    #[tokio::test]
    async fn test_image_written_to_destination() {
        let server = MockServer::start().await;
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"\x89PNG fake");
        Mock::given(method("POST"))
            .and(path("/models/imagen-4.0-ultra-generate-001:predict"))
            .and(body_partial_json(json!({
                "parameters": { "sampleCount": 1, "aspectRatio": "9:16", "imageSize": "2K" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "predictions": [{ "bytesBase64Encoded": encoded, "mimeType": "image/png" }]
            })))
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let destination = temp_dir.path().join("cover.png");
        let path = client(&server)
            .generate_image(&ImageRequest {
                prompt: "A battery farm at dusk".to_string(),
                aspect_ratio: AspectRatio::Portrait,
                resolution: ImageResolution::High,
                destination: destination.clone(),
            })
            .await
            .unwrap();

        assert_eq!(path, destination);
        assert_eq!(std::fs::read(&destination).unwrap(), b"\x89PNG fake");
    }

    #[tokio::test]
    async fn test_filtered_image_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let destination = temp_dir.path().join("slide_01.png");
        let err = client(&server)
            .generate_image(&ImageRequest {
                prompt: "x".to_string(),
                aspect_ratio: AspectRatio::Square,
                resolution: ImageResolution::Standard,
                destination: destination.clone(),
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, ToolErrorKind::Permanent);
        assert!(!destination.exists());
    }
}
