use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use orchestrator::tools::{
    DEFAULT_BASE_URL, DEFAULT_CONVERTER_URL, DEFAULT_IMAGE_MODEL, DEFAULT_TEXT_MODEL,
};
use orchestrator::{ApprovalSettings, EngineConfig, RetryPolicy};
use serde::{Deserialize, Serialize};

pub const CAROUSEL_DIR: &str = ".carousel";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CarouselConfig {
    pub gemini: GeminiConfig,
    pub converter: ConverterConfig,
    pub sandbox: SandboxConfig,
    pub output: OutputConfig,
    pub approval: ApprovalConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeminiConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: String,
    pub text_model: String,
    pub image_model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConverterConfig {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_CONVERTER_URL.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    pub interpreter: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApprovalConfig {
    pub auto_approve: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            timeout_secs: policy.timeout.as_secs(),
        }
    }
}

impl CarouselConfig {
    /// Path of the project config relative to `root`.
    pub fn path(root: &Path) -> PathBuf {
        root.join(CAROUSEL_DIR).join(CONFIG_FILE)
    }

    /// Load `.carousel/config.toml` under `root` (defaults when absent),
    /// then apply environment overrides.
    pub async fn load(root: &Path) -> Result<Self> {
        let path = Self::path(root);
        let mut config = if path.exists() {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Self::parse(&content).with_context(|| format!("Invalid config {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Override fields from environment variables, read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("GEMINI_API_KEY") {
            self.gemini.api_key = Some(v);
        }
        if let Some(v) = get("CAROUSEL_TEXT_MODEL").or_else(|| get("MODEL")) {
            self.gemini.text_model = v;
        }
        if let Some(v) = get("CAROUSEL_IMAGE_MODEL") {
            self.gemini.image_model = v;
        }
        if let Some(v) = get("CAROUSEL_GEMINI_URL") {
            self.gemini.base_url = v;
        }
        if let Some(v) = get("CAROUSEL_CONVERTER_URL") {
            self.converter.url = v;
        }
        if let Some(v) = get("CAROUSEL_CONVERTER_API_KEY") {
            self.converter.api_key = Some(v);
        }
        if let Some(v) = get("CAROUSEL_PYTHON") {
            self.sandbox.interpreter = v;
        }
        if let Some(v) = get("CAROUSEL_OUTPUT_DIR") {
            self.output.dir = PathBuf::from(v);
        }
        if let Some(v) = get("CAROUSEL_APPROVAL_TIMEOUT_SECS") {
            let secs = v
                .trim()
                .parse()
                .with_context(|| format!("CAROUSEL_APPROVAL_TIMEOUT_SECS is not a number: {}", v))?;
            self.approval.timeout_secs = Some(secs);
        }
        if let Some(v) = get("CAROUSEL_AUTO_APPROVE") {
            self.approval.auto_approve = parse_bool(&v)
                .with_context(|| format!("CAROUSEL_AUTO_APPROVE is not a boolean: {}", v))?;
        }
        Ok(())
    }

    pub fn engine_config(&self, extended_review: bool) -> EngineConfig {
        let approval = ApprovalSettings {
            auto_approve: self.approval.auto_approve,
            deadline: self.approval.timeout_secs.map(Duration::from_secs),
            ..ApprovalSettings::default()
        };
        let retry = RetryPolicy::default()
            .with_max_attempts(self.retry.max_attempts)
            .with_timeout(Duration::from_secs(self.retry.timeout_secs));

        EngineConfig::new(&self.output.dir)
            .with_approval(approval)
            .with_retry(retry)
            .with_extended_review(extended_review)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_round_trip_through_toml() {
        let config = CarouselConfig::default();
        let parsed = CarouselConfig::parse(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.retry.max_attempts, 3);
        assert_eq!(parsed.retry.timeout_secs, 120);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = CarouselConfig::parse(
            r#"
            [gemini]
            text_model = "gemini-2.5-flash"

            [approval]
            timeout_secs = 300
            "#,
        )
        .unwrap();

        assert_eq!(config.gemini.text_model, "gemini-2.5-flash");
        assert_eq!(config.gemini.image_model, DEFAULT_IMAGE_MODEL);
        assert_eq!(config.approval.timeout_secs, Some(300));
        assert_eq!(config.converter.url, DEFAULT_CONVERTER_URL);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = CarouselConfig::parse("[gemini]\ntext_model = \"from-file\"").unwrap();
        config
            .apply_env(env(&[
                ("GEMINI_API_KEY", "key"),
                ("MODEL", "gemini/gemini-2.5-flash"),
                ("CAROUSEL_AUTO_APPROVE", "true"),
                ("CAROUSEL_OUTPUT_DIR", "/tmp/deck"),
                ("CAROUSEL_CONVERTER_API_KEY", ""),
            ]))
            .unwrap();

        assert_eq!(config.gemini.api_key.as_deref(), Some("key"));
        assert_eq!(config.gemini.text_model, "gemini/gemini-2.5-flash");
        assert!(config.approval.auto_approve);
        assert_eq!(config.output.dir, PathBuf::from("/tmp/deck"));
        assert!(config.converter.api_key.is_none());
    }

    #[test]
    fn test_invalid_env_value_rejected() {
        let mut config = CarouselConfig::default();
        let err = config
            .apply_env(env(&[("CAROUSEL_APPROVAL_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("CAROUSEL_APPROVAL_TIMEOUT_SECS"));
    }

    #[test]
    fn test_engine_config() {
        let mut config = CarouselConfig::default();
        config.approval.timeout_secs = Some(60);
        config.retry.max_attempts = 5;

        let engine = config.engine_config(true);
        assert_eq!(engine.approval.deadline, Some(Duration::from_secs(60)));
        assert_eq!(engine.retry.max_attempts, 5);
        assert!(engine.extended_review);
        assert!(!engine.approval.auto_approve);
    }

    #[tokio::test]
    async fn test_load_missing_file_uses_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = CarouselConfig::load(temp_dir.path()).await.unwrap();
        assert!(!config.sandbox.interpreter.is_empty());
    }
}
