use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage::StageId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalResolution {
    Approved,
    Rejected,
    TimedOut,
}

impl ApprovalResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::TimedOut => "timed_out",
        }
    }
}

impl From<Decision> for ApprovalResolution {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Approve => Self::Approved,
            Decision::Reject => Self::Rejected,
        }
    }
}

/// Replies accepted at an approval checkpoint.
///
/// The first token of each list is the canonical keyword. A reply matches a
/// side when it equals one of that side's tokens, or when it is a non-empty
/// prefix of the side's canonical keyword (`"ye"` approves). Comparison is
/// case-insensitive on the trimmed reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecisionTokens {
    pub affirmative: Vec<String>,
    pub negative: Vec<String>,
}

impl Default for DecisionTokens {
    fn default() -> Self {
        Self {
            affirmative: ["yes", "y", "approve", "ok", "continue", "proceed"]
                .into_iter()
                .map(String::from)
                .collect(),
            negative: ["no", "n", "reject"].into_iter().map(String::from).collect(),
        }
    }
}

impl DecisionTokens {
    pub fn canonical_affirmative(&self) -> &str {
        self.affirmative.first().map(String::as_str).unwrap_or("yes")
    }

    pub fn canonical_negative(&self) -> &str {
        self.negative.first().map(String::as_str).unwrap_or("no")
    }

    /// Classify a free-form reply. `None` means the reply must be reprompted.
    pub fn classify(&self, reply: &str) -> Option<Decision> {
        let reply = reply.trim().to_lowercase();
        if reply.is_empty() {
            return None;
        }

        let approves = Self::side_matches(&reply, &self.affirmative, self.canonical_affirmative());
        let rejects = Self::side_matches(&reply, &self.negative, self.canonical_negative());

        match (approves, rejects) {
            (true, false) => Some(Decision::Approve),
            (false, true) => Some(Decision::Reject),
            _ => None,
        }
    }

    fn side_matches(reply: &str, tokens: &[String], canonical: &str) -> bool {
        tokens.iter().any(|t| t.eq_ignore_ascii_case(reply))
            || canonical.to_lowercase().starts_with(reply)
    }
}

/// A pending or resolved human checkpoint in front of one stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub stage: StageId,
    pub prompt: String,
    pub tokens: DecisionTokens,
    pub created_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub resolution: Option<ApprovalResolution>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn new(stage: StageId, prompt: impl Into<String>, tokens: DecisionTokens) -> Self {
        Self {
            id: Uuid::new_v4(),
            stage,
            prompt: prompt.into(),
            tokens,
            created_at: Utc::now(),
            deadline: None,
            resolution: None,
            resolved_at: None,
        }
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Record the outcome. Only the first resolution sticks; returns whether
    /// this call resolved the request.
    pub fn resolve(&mut self, resolution: ApprovalResolution) -> bool {
        if self.resolution.is_some() {
            return false;
        }
        self.resolution = Some(resolution);
        self.resolved_at = Some(Utc::now());
        true
    }
}
