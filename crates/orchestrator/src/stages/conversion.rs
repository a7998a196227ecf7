use async_trait::async_trait;
use carousel_core::{ContextKey, StageDescriptor, StageId};
use tracing::info;

use super::payloads::{AssembledDocument, ConvertedDocument};
use crate::artifacts::CONVERTED_DOCUMENT;
use crate::core::{Stage, StageContext, StageOutput};
use crate::error::Result;
use crate::tools::ConversionRequest;

/// Renders the assembled document into its final paged format.
pub struct DocumentConversionStage {
    descriptor: StageDescriptor,
}

impl DocumentConversionStage {
    pub fn new() -> Self {
        Self {
            descriptor: StageDescriptor::new(StageId::DocumentConversion, ContextKey::CONVERTED)
                .with_inputs([ContextKey::DOCUMENT]),
        }
    }
}

impl Default for DocumentConversionStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for DocumentConversionStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput> {
        let document: AssembledDocument = ctx.input(&ContextKey::DOCUMENT)?;

        let bytes = ctx
            .convert_document(ConversionRequest {
                document: document.path.clone(),
                assets: document.assets.clone(),
                page_style: ctx.run_input().aspect_ratio.page_style().to_string(),
            })
            .await?;

        if bytes.is_empty() {
            return Err(ctx.stage_output_error("converter returned an empty document"));
        }

        let artifact = ctx.commit_artifact(CONVERTED_DOCUMENT, &bytes).await?;
        info!(path = %artifact.path.display(), bytes = bytes.len(), "Document converted");

        let converted = ConvertedDocument {
            path: artifact.path.clone(),
            source: document.path,
            assets: document.assets,
        };
        Ok(StageOutput::new(&converted)?.with_artifacts([artifact]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor() {
        let stage = DocumentConversionStage::new();
        assert_eq!(stage.descriptor().inputs, vec![ContextKey::DOCUMENT]);
        assert_eq!(stage.descriptor().output, ContextKey::CONVERTED);
        assert!(!stage.descriptor().requires_approval);
    }
}
