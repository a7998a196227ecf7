//! External capabilities the pipeline delegates to.
//!
//! Every backend implements one of the contracts below and is only ever
//! called through [`ToolInvoker`], which owns timeout, retry and error
//! classification. Backends report failures as [`ToolError`] and never
//! retry on their own.

mod adapter;
mod converter;
mod gemini;
mod sandbox;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use carousel_core::AspectRatio;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use adapter::{InvocationLog, InvocationOutcome, RetryPolicy, ToolInvocation, ToolInvoker};
pub use converter::{HttpDocumentConverter, DEFAULT_CONVERTER_URL};
pub use gemini::{GeminiClient, DEFAULT_BASE_URL, DEFAULT_IMAGE_MODEL, DEFAULT_TEXT_MODEL};
pub use sandbox::{PythonSandbox, CHART_DIR_ENV};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolId {
    GenerateText,
    ExecuteCode,
    GenerateImage,
    ConvertDocument,
}

impl ToolId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GenerateText => "generate_text",
            Self::ExecuteCode => "execute_code",
            Self::GenerateImage => "generate_image",
            Self::ConvertDocument => "convert_document",
        }
    }
}

impl std::fmt::Display for ToolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Network timeout, rate limit, 5xx: worth another attempt
    Transient,
    /// Invalid request, authentication, content policy: never retried
    Permanent,
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        })
    }
}

/// Classified failure of a single tool attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} tool error: {message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ToolErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ToolErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ToolErrorKind::Transient
    }

    /// Classify a non-success HTTP status. Request timeout, rate limiting
    /// and server errors are transient.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, truncate(body, 500))
        };
        if status == 408 || status == 429 || status >= 500 {
            Self::transient(message)
        } else {
            Self::permanent(message)
        }
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_body() {
            return Self::transient(e.to_string());
        }
        match e.status() {
            Some(status) => Self::from_status(status.as_u16(), ""),
            None if e.is_request() => Self::transient(e.to_string()),
            None => Self::permanent(e.to_string()),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ============================================================================
// Contracts
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRequest {
    pub prompt: String,
    pub grounding: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub title: String,
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextResponse {
    pub text: String,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ImageResolution {
    #[default]
    #[serde(rename = "1K")]
    Standard,
    #[serde(rename = "2K")]
    High,
}

impl ImageResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "1K",
            Self::High => "2K",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
    pub resolution: ImageResolution,
    /// Reserved artifact path the image must be committed to
    pub destination: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRequest {
    pub snippet: String,
    /// Directory the snippet is expected to write its files into
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeOutput {
    pub produced_files: Vec<PathBuf>,
    pub stdout: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub document: PathBuf,
    pub assets: Vec<PathBuf>,
    pub page_style: String,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, request: &TextRequest) -> Result<TextResponse, ToolError>;
}

#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute_code(&self, request: &CodeRequest) -> Result<CodeOutput, ToolError>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate one image and commit it to `request.destination`.
    async fn generate_image(&self, request: &ImageRequest) -> Result<PathBuf, ToolError>;
}

#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Convert the document and return the converted file's bytes.
    async fn convert_document(&self, request: &ConversionRequest) -> Result<Vec<u8>, ToolError>;
}

/// The set of backends one engine instance talks to.
#[derive(Clone)]
pub struct Toolset {
    pub text: Arc<dyn TextGenerator>,
    pub code: Arc<dyn CodeExecutor>,
    pub images: Arc<dyn ImageGenerator>,
    pub converter: Arc<dyn DocumentConverter>,
}

impl Toolset {
    pub fn new(
        text: Arc<dyn TextGenerator>,
        code: Arc<dyn CodeExecutor>,
        images: Arc<dyn ImageGenerator>,
        converter: Arc<dyn DocumentConverter>,
    ) -> Self {
        Self {
            text,
            code,
            images,
            converter,
        }
    }
}

impl std::fmt::Debug for Toolset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolset").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(ToolError::from_status(429, "slow down").is_transient());
        assert!(ToolError::from_status(503, "").is_transient());
        assert!(ToolError::from_status(408, "").is_transient());
        assert!(!ToolError::from_status(400, "bad prompt").is_transient());
        assert!(!ToolError::from_status(401, "").is_transient());
        assert!(!ToolError::from_status(403, "").is_transient());
    }

    #[test]
    fn test_status_message_truncated() {
        let body = "x".repeat(2000);
        let err = ToolError::from_status(500, &body);
        assert!(err.message.len() < 600);
        assert!(err.message.starts_with("HTTP 500"));
    }

    #[test]
    fn test_tool_id_names() {
        assert_eq!(ToolId::ConvertDocument.as_str(), "convert_document");
        assert_eq!(
            serde_json::to_string(&ToolId::ExecuteCode).unwrap(),
            "\"execute_code\""
        );
    }
}
