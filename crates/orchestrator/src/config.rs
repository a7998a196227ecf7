use std::path::PathBuf;
use std::time::Duration;

use crate::approval::ApprovalSettings;
use crate::tools::RetryPolicy;

/// Engine configuration. Immutable once the engine is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Directory every artifact is written under
    pub artifact_dir: PathBuf,
    pub approval: ApprovalSettings,
    pub retry: RetryPolicy,
    /// Also review the research findings and the visuals before they are used
    pub extended_review: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("."),
            approval: ApprovalSettings::default(),
            retry: RetryPolicy::default(),
            extended_review: false,
        }
    }
}

impl EngineConfig {
    pub fn new(artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_approval(mut self, approval: ApprovalSettings) -> Self {
        self.approval = approval;
        self
    }

    pub fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.approval.auto_approve = auto_approve;
        self
    }

    pub fn with_approval_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.approval.deadline = deadline;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_extended_review(mut self, extended_review: bool) -> Self {
        self.extended_review = extended_review;
        self
    }
}
