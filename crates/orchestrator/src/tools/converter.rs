//! HTTP conversion backend: uploads the document and its assets as one
//! multipart request and returns the converted bytes.

use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::{debug, warn};

use super::{ConversionRequest, DocumentConverter, ToolError};

pub const DEFAULT_CONVERTER_URL: &str = "http://localhost:3000/forms/chromium/convert/html";

/// File name the converter expects for the entry document
const INDEX_FILE_NAME: &str = "index.html";

#[derive(Clone)]
pub struct HttpDocumentConverter {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpDocumentConverter {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn build_form(&self, request: &ConversionRequest) -> Result<Form, ToolError> {
        let base = request.document.parent().unwrap_or_else(|| Path::new(""));

        let document = read_part(&request.document, INDEX_FILE_NAME.to_string()).await?;
        let mut form = Form::new()
            .percent_encode_noop()
            .part("files", document)
            .text("pageStyle", request.page_style.clone());

        for asset in &request.assets {
            let name = upload_name(base, asset);
            form = form.part("files", read_part(asset, name).await?);
        }
        Ok(form)
    }
}

impl std::fmt::Debug for HttpDocumentConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDocumentConverter")
            .field("url", &self.url)
            .field("authenticated", &self.api_key.is_some())
            .finish()
    }
}

/// Assets keep their path relative to the document so references like
/// `images/slide_01.png` resolve on the converter side.
fn upload_name(base: &Path, asset: &Path) -> String {
    let relative = asset.strip_prefix(base).unwrap_or(asset);
    let name = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if name.is_empty() || relative.is_absolute() {
        asset
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        name
    }
}

fn mime_for(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "css" => "text/css",
        _ => "application/octet-stream",
    }
}

async fn read_part(path: &Path, name: String) -> Result<Part, ToolError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ToolError::permanent(format!("cannot read {}: {}", path.display(), e)))?;
    let mime = mime_for(&name);
    Part::bytes(bytes)
        .file_name(name)
        .mime_str(mime)
        .map_err(|e| ToolError::permanent(format!("failed to create form part: {}", e)))
}

#[async_trait]
impl DocumentConverter for HttpDocumentConverter {
    async fn convert_document(&self, request: &ConversionRequest) -> Result<Vec<u8>, ToolError> {
        debug!(
            url = %self.url,
            document = %request.document.display(),
            assets = request.assets.len(),
            "Converting document"
        );

        let form = self.build_form(request).await?;
        let mut builder = self.client.post(&self.url).multipart(form);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Converter error: {}", error_text);
            return Err(ToolError::from_status(status.as_u16(), &error_text));
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolErrorKind;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn fixture() -> (TempDir, ConversionRequest) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("images")).unwrap();
        std::fs::write(root.join("report.html"), "<html><img src=\"images/cover.png\"></html>")
            .unwrap();
        std::fs::write(root.join("images/cover.png"), b"png").unwrap();

        let request = ConversionRequest {
            document: root.join("report.html"),
            assets: vec![root.join("images/cover.png")],
            page_style: "@page { size: A4 landscape; margin: 0; }".to_string(),
        };
        (temp_dir, request)
    }

    #[test]
    fn test_upload_name_keeps_relative_path() {
        let base = Path::new("/out");
        assert_eq!(upload_name(base, Path::new("/out/images/slide_01.png")), "images/slide_01.png");
        assert_eq!(upload_name(base, Path::new("/elsewhere/chart.svg")), "chart.svg");
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for("index.html"), "text/html");
        assert_eq!(mime_for("images/chart.SVG"), "image/svg+xml");
        assert_eq!(mime_for("blob"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_multipart_upload_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/forms/chromium/convert/html"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let (_temp_dir, request) = fixture();
        let converter =
            HttpDocumentConverter::new(format!("{}/forms/chromium/convert/html", server.uri()))
                .with_api_key(Some("secret".to_string()));

        let bytes = converter.convert_document(&request).await.unwrap();
        assert_eq!(bytes, b"%PDF-1.7");

        let received: Vec<Request> = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&received[0].body);
        assert!(body.contains("filename=\"index.html\""));
        assert!(body.contains("filename=\"images/cover.png\""));
        assert!(body.contains("name=\"pageStyle\""));
        assert!(body.contains("A4 landscape"));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let (_temp_dir, request) = fixture();
        let err = HttpDocumentConverter::new(server.uri())
            .convert_document(&request)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ToolErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_missing_asset_is_permanent() {
        let (_temp_dir, mut request) = fixture();
        request.assets.push(PathBuf::from("/nonexistent/slide_09.png"));

        let err = HttpDocumentConverter::new("http://127.0.0.1:9")
            .convert_document(&request)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ToolErrorKind::Permanent);
        assert!(err.message.contains("slide_09.png"));
    }
}
