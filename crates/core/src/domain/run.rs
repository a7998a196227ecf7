use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const DEFAULT_SLIDE_COUNT: u32 = 5;
pub const MAX_SLIDE_COUNT: u32 = 12;
pub const DEFAULT_PERSONA: &str = "General executive audience";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "1:1")]
    Square,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 3] = [Self::Landscape, Self::Portrait, Self::Square];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
            Self::Square => "1:1",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "16:9" => Some(Self::Landscape),
            "9:16" => Some(Self::Portrait),
            "1:1" => Some(Self::Square),
            _ => None,
        }
    }

    /// CSS `@page` rule the document converter applies for this ratio.
    pub fn page_style(&self) -> &'static str {
        match self {
            Self::Landscape => "@page { size: A4 landscape; margin: 0; }",
            Self::Square => "@page { size: 21cm 21cm; margin: 0; }",
            Self::Portrait => "@page { size: A4 portrait; margin: 0; }",
        }
    }
}

impl std::str::FromStr for AspectRatio {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| CoreError::UnsupportedAspectRatio(s.trim().to_string()))
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunInput {
    pub topic: String,
    pub slide_count: u32,
    pub aspect_ratio: AspectRatio,
    pub audience_persona: String,
}

impl RunInput {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            slide_count: DEFAULT_SLIDE_COUNT,
            aspect_ratio: AspectRatio::default(),
            audience_persona: DEFAULT_PERSONA.to_string(),
        }
    }

    pub fn with_slide_count(mut self, count: u32) -> Self {
        self.slide_count = count;
        self
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.audience_persona = persona.into();
        self
    }

    /// Trim free-text fields and reject values no stage could work with.
    pub fn validated(mut self) -> Result<Self, CoreError> {
        self.topic = self.topic.trim().to_string();
        self.audience_persona = self.audience_persona.trim().to_string();

        if self.topic.is_empty() {
            return Err(CoreError::EmptyTopic);
        }
        if self.slide_count == 0 || self.slide_count > MAX_SLIDE_COUNT {
            return Err(CoreError::InvalidSlideCount {
                count: self.slide_count,
                max: MAX_SLIDE_COUNT,
            });
        }
        if self.audience_persona.is_empty() {
            return Err(CoreError::Validation(
                "Audience persona must not be empty".to_string(),
            ));
        }

        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    AwaitingApproval,
    Cancelled,
    Failed,
    Completed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "awaiting_approval" => Some(Self::AwaitingApproval),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Failed | Self::Completed)
    }
}
