use std::path::{Path, PathBuf};

use async_trait::async_trait;
use carousel_core::{ContextKey, RunInput, StageDescriptor, StageId};
use tracing::{info, warn};

use super::parsing::extract_html;
use super::payloads::{AssembledDocument, ContentOutline};
use crate::artifacts::PRIMARY_DOCUMENT;
use crate::context_store::ContextStore;
use crate::core::{Stage, StageContext, StageOutput};
use crate::error::Result;
use crate::prompts::StagePrompts;

/// Lays the outline out as a single HTML document. Gated by default.
pub struct DocumentAssemblyStage {
    descriptor: StageDescriptor,
}

impl DocumentAssemblyStage {
    pub fn new() -> Self {
        Self {
            descriptor: StageDescriptor::new(StageId::DocumentAssembly, ContextKey::DOCUMENT)
                .with_inputs([ContextKey::OUTLINE])
                .with_approval(true),
        }
    }
}

impl Default for DocumentAssemblyStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for DocumentAssemblyStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn approval_prompt(&self, input: &RunInput, _context: &ContextStore) -> String {
        StagePrompts::document_approval(input)
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput> {
        let outline: ContentOutline = ctx.input(&ContextKey::OUTLINE)?;
        let root = ctx.artifacts().root().to_path_buf();

        // The document lives in the artifact root and references images
        // relative to it.
        let relative = relative_outline(&outline, &root);
        let response = ctx
            .generate_text(
                StagePrompts::document_assembly(ctx.run_input(), &relative),
                true,
            )
            .await?;

        let html = extract_html(&response.text)
            .ok_or_else(|| ctx.stage_output_error("response contains no HTML document"))?;

        for asset in relative.asset_paths() {
            let reference = asset.to_string_lossy();
            if !html.contains(reference.as_ref()) {
                warn!(asset = %reference, "Document does not reference asset");
            }
        }

        let artifact = ctx
            .commit_artifact(PRIMARY_DOCUMENT, html.as_bytes())
            .await?;
        info!(path = %artifact.path.display(), bytes = html.len(), "Document assembled");

        let document = AssembledDocument {
            path: artifact.path.clone(),
            assets: outline.asset_paths(),
        };
        Ok(StageOutput::new(&document)?.with_artifacts([artifact]))
    }
}

fn relative_outline(outline: &ContentOutline, root: &Path) -> ContentOutline {
    let rel = |p: &PathBuf| p.strip_prefix(root).unwrap_or(p).to_path_buf();
    let mut relative = outline.clone();
    relative.cover_image = rel(&outline.cover_image);
    for slide in &mut relative.slides {
        slide.image = rel(&slide.image);
        slide.charts = slide.charts.iter().map(rel).collect();
    }
    relative
}
