use std::borrow::Cow;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Research,
    VisualDesign,
    ContentStructuring,
    DocumentAssembly,
    DocumentConversion,
}

impl StageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::VisualDesign => "visual_design",
            Self::ContentStructuring => "content_structuring",
            Self::DocumentAssembly => "document_assembly",
            Self::DocumentConversion => "document_conversion",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "research" => Some(Self::Research),
            "visual_design" => Some(Self::VisualDesign),
            "content_structuring" => Some(Self::ContentStructuring),
            "document_assembly" => Some(Self::DocumentAssembly),
            "document_conversion" => Some(Self::DocumentConversion),
            _ => None,
        }
    }

    /// Human-facing label used by front ends for the progress timeline.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Research => "Research briefing",
            Self::VisualDesign => "Visual design direction",
            Self::ContentStructuring => "Narrative structuring",
            Self::DocumentAssembly => "HTML layout",
            Self::DocumentConversion => "PDF rendering",
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of a slot in the per-run context store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextKey(Cow<'static, str>);

impl ContextKey {
    pub const FINDINGS: ContextKey = ContextKey::from_static("research_findings");
    pub const VISUALS: ContextKey = ContextKey::from_static("visual_assets");
    pub const OUTLINE: ContextKey = ContextKey::from_static("content_outline");
    pub const DOCUMENT: ContextKey = ContextKey::from_static("assembled_document");
    pub const CONVERTED: ContextKey = ContextKey::from_static("converted_document");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContextKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable description of one pipeline step: what it reads, what it
/// writes, and how the engine must treat it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    pub id: StageId,
    pub inputs: Vec<ContextKey>,
    pub output: ContextKey,
    pub requires_approval: bool,
    pub retryable: bool,
}

impl StageDescriptor {
    pub fn new(id: StageId, output: ContextKey) -> Self {
        Self {
            id,
            inputs: Vec::new(),
            output,
            requires_approval: false,
            retryable: true,
        }
    }

    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = ContextKey>) -> Self {
        self.inputs = inputs.into_iter().collect();
        self
    }

    pub fn with_approval(mut self, requires_approval: bool) -> Self {
        self.requires_approval = requires_approval;
        self
    }

    pub fn with_retry(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn declares_input(&self, key: &ContextKey) -> bool {
        self.inputs.iter().any(|k| k == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_id_round_trip_names() {
        for id in [
            StageId::Research,
            StageId::VisualDesign,
            StageId::ContentStructuring,
            StageId::DocumentAssembly,
            StageId::DocumentConversion,
        ] {
            assert_eq!(StageId::parse(id.as_str()), Some(id));
        }
        assert_eq!(StageId::parse("publish"), None);
    }

    #[test]
    fn test_context_key_equality() {
        assert_eq!(ContextKey::FINDINGS, ContextKey::new("research_findings"));
        assert_ne!(ContextKey::FINDINGS, ContextKey::VISUALS);
        assert_eq!(
            serde_json::to_string(&ContextKey::OUTLINE).unwrap(),
            "\"content_outline\""
        );
    }

    #[test]
    fn test_descriptor_builder() {
        let stage = StageDescriptor::new(StageId::DocumentAssembly, ContextKey::DOCUMENT)
            .with_inputs([ContextKey::OUTLINE])
            .with_approval(true);

        assert!(stage.requires_approval);
        assert!(stage.retryable);
        assert!(stage.declares_input(&ContextKey::OUTLINE));
        assert!(!stage.declares_input(&ContextKey::FINDINGS));
    }
}
