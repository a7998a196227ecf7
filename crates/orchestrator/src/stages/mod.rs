//! The fixed carousel pipeline.
//!
//! | # | Stage | Reads | Writes | Gated |
//! |---|---|---|---|---|
//! | 1 | research | | research_findings | extended review |
//! | 2 | visual_design | research_findings | visual_assets | extended review |
//! | 3 | content_structuring | research_findings, visual_assets | content_outline | no |
//! | 4 | document_assembly | content_outline | assembled_document | yes |
//! | 5 | document_conversion | assembled_document | converted_document | no |

mod conversion;
mod document;
mod parsing;
mod payloads;
mod research;
mod structuring;
mod visual;

use std::sync::Arc;

use crate::core::Stage;

pub use conversion::DocumentConversionStage;
pub use document::DocumentAssemblyStage;
pub use parsing::{extract_html, extract_json, parse_json};
pub use payloads::{
    AssembledDocument, ContentOutline, ConvertedDocument, Finding, OutlineSlide,
    ResearchFindings, SlideVisual, VisualAssets,
};
pub use research::ResearchStage;
pub use structuring::ContentStructuringStage;
pub use visual::VisualDesignStage;

/// Build the five stages in execution order. With `extended_review` the
/// research and visual design outputs are also reviewed, by gating the
/// stages that consume them.
pub fn carousel_pipeline(extended_review: bool) -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(ResearchStage::new()),
        Arc::new(VisualDesignStage::new(extended_review)),
        Arc::new(ContentStructuringStage::new(extended_review)),
        Arc::new(DocumentAssemblyStage::new()),
        Arc::new(DocumentConversionStage::new()),
    ]
}
