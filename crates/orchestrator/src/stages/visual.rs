use std::path::Path;

use async_trait::async_trait;
use carousel_core::{Artifact, ContextKey, RunInput, StageDescriptor, StageId};
use futures::future::try_join_all;
use tracing::{debug, info};

use super::payloads::{ResearchFindings, SlideVisual, VisualAssets};
use crate::artifacts::{ArtifactManager, IMAGES_DIR};
use crate::context_store::ContextStore;
use crate::core::{Stage, StageContext, StageOutput};
use crate::error::{OrchestratorError, Result};
use crate::prompts::StagePrompts;
use crate::tools::{CodeRequest, ImageRequest, ImageResolution};

const CHART_EXTENSIONS: [&str; 3] = ["png", "svg", "jpg"];

/// Generates the cover, one illustration per finding and any charts the
/// research asked for.
pub struct VisualDesignStage {
    descriptor: StageDescriptor,
}

impl VisualDesignStage {
    /// `requires_approval` gates the stage on a review of the research findings.
    pub fn new(requires_approval: bool) -> Self {
        Self {
            descriptor: StageDescriptor::new(StageId::VisualDesign, ContextKey::VISUALS)
                .with_inputs([ContextKey::FINDINGS])
                .with_approval(requires_approval),
        }
    }
}

#[async_trait]
impl Stage for VisualDesignStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn approval_prompt(&self, input: &RunInput, context: &ContextStore) -> String {
        match context.get_as::<ResearchFindings>(&ContextKey::FINDINGS) {
            Some(Ok(findings)) => StagePrompts::findings_review(input, &findings),
            _ => format!("Generate visuals for \"{}\"?", input.topic),
        }
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput> {
        let findings: ResearchFindings = ctx.input(&ContextKey::FINDINGS)?;
        let input = ctx.run_input();

        let mut jobs = vec![(
            ArtifactManager::cover_image_name(),
            StagePrompts::cover_image(input),
            ImageResolution::High,
        )];
        for (i, finding) in findings.findings.iter().enumerate() {
            jobs.push((
                ArtifactManager::slide_image_name(i + 1),
                StagePrompts::slide_image(input, finding),
                ImageResolution::Standard,
            ));
        }

        info!(images = jobs.len(), "Generating images");

        let images = try_join_all(jobs.into_iter().map(|(name, prompt, resolution)| async move {
            let destination = ctx.reserve_artifact(&name).await?;
            let path = ctx
                .generate_image(ImageRequest {
                    prompt,
                    aspect_ratio: input.aspect_ratio,
                    resolution,
                    destination,
                })
                .await?;
            debug!(name = %name, path = %path.display(), "Image committed");
            Ok::<_, OrchestratorError>(Artifact::new(name, path, ctx.stage()))
        }));

        let charts = async {
            let mut charts = Vec::new();
            for (i, finding) in findings.findings.iter().enumerate() {
                if let Some(snippet) = finding.chart_snippet.as_deref() {
                    charts.push((i + 1, render_chart(ctx, i + 1, snippet).await?));
                }
            }
            Ok::<_, OrchestratorError>(charts)
        };

        let (images, charts) = tokio::try_join!(images, charts)?;

        let mut slides: Vec<SlideVisual> = images[1..]
            .iter()
            .enumerate()
            .map(|(i, artifact)| SlideVisual {
                index: i + 1,
                image: artifact.path.clone(),
                charts: Vec::new(),
            })
            .collect();
        for (index, rendered) in &charts {
            if let Some(slide) = slides.get_mut(index - 1) {
                slide.charts = rendered.iter().map(|a| a.path.clone()).collect();
            }
        }

        let assets = VisualAssets {
            cover: images[0].path.clone(),
            slides,
        };

        let mut artifacts = images;
        artifacts.extend(charts.into_iter().flat_map(|(_, rendered)| rendered));

        Ok(StageOutput::new(&assets)?.with_artifacts(artifacts))
    }
}

/// Run a chart snippet in a scratch directory and commit every image it
/// produced as `images/chart_NN_<file>`.
async fn render_chart(ctx: &StageContext, index: usize, snippet: &str) -> Result<Vec<Artifact>> {
    let scratch = tempfile::tempdir()
        .map_err(|e| OrchestratorError::artifact_write(std::env::temp_dir(), e))?;

    let output = ctx
        .execute_code(CodeRequest {
            snippet: snippet.to_string(),
            output_dir: scratch.path().to_path_buf(),
        })
        .await?;

    let mut artifacts = Vec::new();
    for file in output.produced_files.iter().filter(|p| is_chart_file(p)) {
        let Some(file_name) = file.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let bytes = tokio::fs::read(file)
            .await
            .map_err(|e| OrchestratorError::artifact_write(file, e))?;
        let name = chart_name(index, file_name);
        artifacts.push(ctx.commit_artifact(&name, &bytes).await?);
    }

    debug!(slide = index, charts = artifacts.len(), "Chart snippet rendered");
    Ok(artifacts)
}

fn chart_name(index: usize, file_name: &str) -> String {
    format!("{}/chart_{:02}_{}", IMAGES_DIR, index, file_name)
}

fn is_chart_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| CHART_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
