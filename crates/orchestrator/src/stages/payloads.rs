//! Typed payloads stored in the context store, one per stage output.
//!
//! Payloads reference files by path only; binary content always lives in the
//! artifact directory.

use std::path::PathBuf;

use carousel_core::AspectRatio;
use serde::{Deserialize, Serialize};

use crate::tools::Citation;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    pub headline: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistic: Option<String>,
    /// Prompt for the slide's illustration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_prompt: Option<String>,
    /// Python snippet that renders a chart for this finding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Output of `research`: one finding per slide.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResearchFindings {
    pub topic: String,
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlideVisual {
    /// 1-indexed slide number
    pub index: usize,
    pub image: PathBuf,
    #[serde(default)]
    pub charts: Vec<PathBuf>,
}

/// Output of `visual_design`: a cover plus one image per slide.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VisualAssets {
    pub cover: PathBuf,
    pub slides: Vec<SlideVisual>,
}

impl VisualAssets {
    /// Cover, slide images in order, then charts.
    pub fn all_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.cover.clone()];
        paths.extend(self.slides.iter().map(|s| s.image.clone()));
        paths.extend(self.slides.iter().flat_map(|s| s.charts.iter().cloned()));
        paths
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutlineSlide {
    pub index: usize,
    pub headline: String,
    pub body: String,
    pub image: PathBuf,
    #[serde(default)]
    pub charts: Vec<PathBuf>,
}

/// Output of `content_structuring`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentOutline {
    pub title: String,
    pub subtitle: String,
    pub audience: String,
    pub aspect_ratio: AspectRatio,
    pub cover_image: PathBuf,
    pub slides: Vec<OutlineSlide>,
}

impl ContentOutline {
    /// Every image the outline references: cover, slides in order, charts.
    pub fn asset_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.cover_image.clone()];
        paths.extend(self.slides.iter().map(|s| s.image.clone()));
        paths.extend(self.slides.iter().flat_map(|s| s.charts.iter().cloned()));
        paths
    }
}

/// Output of `document_assembly`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssembledDocument {
    pub path: PathBuf,
    pub assets: Vec<PathBuf>,
}

/// Output of `document_conversion`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConvertedDocument {
    pub path: PathBuf,
    pub source: PathBuf,
    pub assets: Vec<PathBuf>,
}
