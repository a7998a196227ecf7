use async_trait::async_trait;
use carousel_core::{ContextKey, StageDescriptor, StageId};
use serde::Deserialize;
use tracing::{info, warn};

use super::parsing::parse_json;
use super::payloads::{Finding, ResearchFindings};
use crate::core::{Stage, StageContext, StageOutput};
use crate::error::Result;
use crate::prompts::StagePrompts;
use crate::tools::Citation;

#[derive(Deserialize)]
struct RawResearch {
    findings: Vec<Finding>,
}

/// Grounded web research producing one finding per slide.
pub struct ResearchStage {
    descriptor: StageDescriptor,
}

impl ResearchStage {
    pub fn new() -> Self {
        Self {
            descriptor: StageDescriptor::new(StageId::Research, ContextKey::FINDINGS),
        }
    }
}

impl Default for ResearchStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for ResearchStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput> {
        let input = ctx.run_input();
        let expected = input.slide_count as usize;

        let response = ctx
            .generate_text(StagePrompts::research(input), true)
            .await?;

        let raw: RawResearch = parse_json(&response.text).map_err(|e| {
            warn!(
                error = %e,
                preview = %response.text.chars().take(300).collect::<String>(),
                "Research response is not valid JSON"
            );
            ctx.stage_output_error(format!("research response is not valid JSON: {}", e))
        })?;

        let mut findings: Vec<Finding> = raw
            .findings
            .into_iter()
            .filter(|f| !f.headline.trim().is_empty())
            .collect();

        if findings.len() < expected {
            return Err(ctx.stage_output_error(format!(
                "expected {} findings, model returned {}",
                expected,
                findings.len()
            )));
        }
        findings.truncate(expected);

        let citations = dedup_citations(response.citations);
        info!(
            findings = findings.len(),
            citations = citations.len(),
            "Research completed"
        );

        StageOutput::new(&ResearchFindings {
            topic: input.topic.clone(),
            findings,
            citations,
        })
    }
}

fn dedup_citations(citations: Vec<Citation>) -> Vec<Citation> {
    let mut seen = std::collections::HashSet::new();
    citations
        .into_iter()
        .filter(|c| seen.insert(c.uri.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor() {
        let stage = ResearchStage::new();
        let descriptor = stage.descriptor();
        assert_eq!(descriptor.id, StageId::Research);
        assert!(descriptor.inputs.is_empty());
        assert_eq!(descriptor.output, ContextKey::FINDINGS);
        assert!(!descriptor.requires_approval);
    }

    #[test]
    fn test_dedup_citations() {
        let citation = |uri: &str| Citation {
            title: "Source".to_string(),
            uri: uri.to_string(),
        };
        let deduped = dedup_citations(vec![
            citation("https://a.example"),
            citation("https://b.example"),
            citation("https://a.example"),
        ]);
        assert_eq!(deduped.len(), 2);
    }
}
