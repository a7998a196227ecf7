use async_trait::async_trait;
use carousel_core::{ContextKey, RunInput, StageDescriptor, StageId};
use serde::Deserialize;
use tracing::{info, warn};

use super::parsing::parse_json;
use super::payloads::{ContentOutline, OutlineSlide, ResearchFindings, VisualAssets};
use crate::context_store::ContextStore;
use crate::core::{Stage, StageContext, StageOutput};
use crate::error::Result;
use crate::prompts::StagePrompts;

#[derive(Deserialize)]
struct RawOutline {
    title: String,
    #[serde(default)]
    subtitle: String,
    slides: Vec<RawSlide>,
}

#[derive(Deserialize)]
struct RawSlide {
    headline: String,
    #[serde(default)]
    body: String,
}

/// Turns findings into slide copy. Image references come from the visual
/// assets payload, never from model text.
pub struct ContentStructuringStage {
    descriptor: StageDescriptor,
}

impl ContentStructuringStage {
    /// `requires_approval` gates the stage on a review of the generated visuals.
    pub fn new(requires_approval: bool) -> Self {
        Self {
            descriptor: StageDescriptor::new(StageId::ContentStructuring, ContextKey::OUTLINE)
                .with_inputs([ContextKey::FINDINGS, ContextKey::VISUALS])
                .with_approval(requires_approval),
        }
    }
}

#[async_trait]
impl Stage for ContentStructuringStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn approval_prompt(&self, input: &RunInput, context: &ContextStore) -> String {
        match context.get_as::<VisualAssets>(&ContextKey::VISUALS) {
            Some(Ok(visuals)) => StagePrompts::visuals_review(input, &visuals),
            _ => format!("Write slide copy for \"{}\"?", input.topic),
        }
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput> {
        let findings: ResearchFindings = ctx.input(&ContextKey::FINDINGS)?;
        let visuals: VisualAssets = ctx.input(&ContextKey::VISUALS)?;
        let input = ctx.run_input();

        let response = ctx
            .generate_text(StagePrompts::content_structuring(input, &findings), false)
            .await?;

        let raw: RawOutline = parse_json(&response.text).map_err(|e| {
            warn!(error = %e, "Outline response is not valid JSON");
            ctx.stage_output_error(format!("outline response is not valid JSON: {}", e))
        })?;

        let outline = attach_visuals(raw, &visuals, ctx)?;
        info!(
            title = %outline.title,
            slides = outline.slides.len(),
            "Outline structured"
        );

        StageOutput::new(&outline)
    }
}

fn attach_visuals(
    raw: RawOutline,
    visuals: &VisualAssets,
    ctx: &StageContext,
) -> Result<ContentOutline> {
    let input = ctx.run_input();
    let expected = visuals.slides.len();

    if raw.slides.len() < expected {
        return Err(ctx.stage_output_error(format!(
            "expected {} slides, model returned {}",
            expected,
            raw.slides.len()
        )));
    }

    let slides = raw
        .slides
        .into_iter()
        .zip(&visuals.slides)
        .map(|(slide, visual)| OutlineSlide {
            index: visual.index,
            headline: slide.headline,
            body: slide.body,
            image: visual.image.clone(),
            charts: visual.charts.clone(),
        })
        .collect();

    Ok(ContentOutline {
        title: if raw.title.trim().is_empty() {
            input.topic.clone()
        } else {
            raw.title
        },
        subtitle: raw.subtitle,
        audience: input.audience_persona.clone(),
        aspect_ratio: input.aspect_ratio,
        cover_image: visuals.cover.clone(),
        slides,
    })
}
