//! Stage trait and the context a stage executes in.
//!
//! Every pipeline step implements [`Stage`]. The engine owns ordering,
//! approval, dependency checks and context writes; a stage only reads its
//! declared inputs, calls tools through the adapter and returns a payload.

use std::path::PathBuf;

use async_trait::async_trait;
use carousel_core::{Artifact, ContextEntry, ContextKey, RunInput, StageDescriptor, StageId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::artifacts::ArtifactManager;
use crate::context_store::ContextStore;
use crate::error::{OrchestratorError, Result};
use crate::tools::{
    CodeOutput, CodeRequest, ConversionRequest, ImageRequest, TextRequest, TextResponse, ToolId,
    ToolInvoker, Toolset,
};

/// Payload and files produced by one stage execution.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub payload: serde_json::Value,
    pub artifacts: Vec<Artifact>,
}

impl StageOutput {
    pub fn new<T: Serialize>(payload: &T) -> Result<Self> {
        Ok(Self {
            payload: serde_json::to_value(payload)?,
            artifacts: Vec::new(),
        })
    }

    pub fn with_artifacts(mut self, artifacts: impl IntoIterator<Item = Artifact>) -> Self {
        self.artifacts.extend(artifacts);
        self
    }
}

/// Core trait that all pipeline stages implement.
#[async_trait]
pub trait Stage: Send + Sync {
    fn descriptor(&self) -> &StageDescriptor;

    fn id(&self) -> StageId {
        self.descriptor().id
    }

    /// Text shown to the operator when the stage is gated. `context` holds
    /// the outputs the stage is about to consume.
    fn approval_prompt(&self, input: &RunInput, _context: &ContextStore) -> String {
        format!(
            "Proceed with {} for \"{}\"?",
            self.id().label().to_lowercase(),
            input.topic
        )
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput>;
}

/// Everything a stage may touch while executing.
pub struct StageContext {
    run_id: Uuid,
    input: RunInput,
    descriptor: StageDescriptor,
    inputs: Vec<ContextEntry>,
    tools: Toolset,
    invoker: ToolInvoker,
    artifacts: ArtifactManager,
}

impl StageContext {
    pub fn new(
        run_id: Uuid,
        input: RunInput,
        descriptor: StageDescriptor,
        inputs: Vec<ContextEntry>,
        tools: Toolset,
        invoker: ToolInvoker,
        artifacts: ArtifactManager,
    ) -> Self {
        Self {
            run_id,
            input,
            descriptor,
            inputs,
            tools,
            invoker,
            artifacts,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn run_input(&self) -> &RunInput {
        &self.input
    }

    pub fn stage(&self) -> StageId {
        self.descriptor.id
    }

    pub fn artifacts(&self) -> &ArtifactManager {
        &self.artifacts
    }

    /// Decode a declared input. Reading a key the stage did not declare is
    /// an error even if another stage has written it.
    pub fn input<T: DeserializeOwned>(&self, key: &ContextKey) -> Result<T> {
        if !self.descriptor.declares_input(key) {
            return Err(OrchestratorError::UndeclaredInput {
                stage: self.stage(),
                key: key.clone(),
            });
        }
        let entry = self
            .inputs
            .iter()
            .find(|e| &e.key == key)
            .ok_or_else(|| OrchestratorError::DependencyMissing {
                stage: self.stage(),
                key: key.clone(),
            })?;
        Ok(serde_json::from_value(entry.payload.clone())?)
    }

    pub async fn generate_text(&self, prompt: String, grounding: bool) -> Result<TextResponse> {
        let request = &TextRequest { prompt, grounding };
        let backend = &self.tools.text;
        self.invoker
            .invoke(ToolId::GenerateText, move || backend.generate_text(request))
            .await
    }

    pub async fn generate_image(&self, request: ImageRequest) -> Result<PathBuf> {
        let request = &request;
        let backend = &self.tools.images;
        self.invoker
            .invoke(ToolId::GenerateImage, move || backend.generate_image(request))
            .await
    }

    pub async fn execute_code(&self, request: CodeRequest) -> Result<CodeOutput> {
        let request = &request;
        let backend = &self.tools.code;
        self.invoker
            .invoke(ToolId::ExecuteCode, move || backend.execute_code(request))
            .await
    }

    pub async fn convert_document(&self, request: ConversionRequest) -> Result<Vec<u8>> {
        let request = &request;
        let backend = &self.tools.converter;
        self.invoker
            .invoke(ToolId::ConvertDocument, move || backend.convert_document(request))
            .await
    }

    /// Atomically write an artifact produced by this stage.
    pub async fn commit_artifact(&self, name: &str, bytes: &[u8]) -> Result<Artifact> {
        self.artifacts.commit(name, self.stage(), bytes).await
    }

    pub async fn reserve_artifact(&self, name: &str) -> Result<PathBuf> {
        self.artifacts.reserve(name).await
    }

    pub fn stage_output_error(&self, reason: impl Into<String>) -> OrchestratorError {
        OrchestratorError::stage_output(self.stage(), reason)
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("run_id", &self.run_id)
            .field("stage", &self.descriptor.id)
            .field("inputs", &self.inputs.len())
            .finish()
    }
}
