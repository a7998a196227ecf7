use std::path::{Path, PathBuf};

use carousel_core::{ContextKey, CoreError, RunStatus, StageId};
use thiserror::Error;
use uuid::Uuid;

use crate::tools::{ToolErrorKind, ToolId};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid run input: {0}")]
    InvalidInput(#[from] CoreError),

    #[error("Stage {stage} is missing declared input '{key}'")]
    DependencyMissing { stage: StageId, key: ContextKey },

    #[error("Stage {stage} read undeclared input '{key}'")]
    UndeclaredInput { stage: StageId, key: ContextKey },

    #[error("Context key '{key}' was already written by stage {existing}")]
    ContextOverwrite { key: ContextKey, existing: StageId },

    #[error("Tool {tool} failed ({kind}) after {attempts} attempt(s): {message}")]
    ToolInvocation {
        tool: ToolId,
        kind: ToolErrorKind,
        attempts: u32,
        message: String,
    },

    #[error("Approval for stage {stage} timed out")]
    ApprovalTimeout { stage: StageId },

    #[error("Approval for stage {stage} was rejected")]
    ApprovalRejected { stage: StageId },

    #[error("Failed to write artifact {}: {source}", .path.display())]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Run cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("Stage {stage} produced unusable output: {reason}")]
    StageOutput { stage: StageId, reason: String },

    #[error("Engine is already executing run {0}")]
    EngineBusy(Uuid),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Create an artifact write error for the given path.
    pub fn artifact_write(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::ArtifactWrite {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a stage output error.
    pub fn stage_output(stage: StageId, reason: impl Into<String>) -> Self {
        Self::StageOutput {
            stage,
            reason: reason.into(),
        }
    }

    /// Stable classification reported alongside a failed or cancelled run.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::DependencyMissing { .. } => "dependency_missing",
            Self::UndeclaredInput { .. } => "undeclared_input",
            Self::ContextOverwrite { .. } => "context_overwrite",
            Self::ToolInvocation {
                kind: ToolErrorKind::Transient,
                ..
            } => "tool_invocation_transient",
            Self::ToolInvocation {
                kind: ToolErrorKind::Permanent,
                ..
            } => "tool_invocation_permanent",
            Self::ApprovalTimeout { .. } => "approval_timeout",
            Self::ApprovalRejected { .. } => "approval_rejected",
            Self::ArtifactWrite { .. } => "artifact_write",
            Self::Cancelled { .. } => "cancelled",
            Self::StageOutput { .. } => "stage_output",
            Self::EngineBusy(_) => "engine_busy",
            Self::Serialization(_) => "serialization",
            Self::Config(_) => "configuration",
            Self::Internal(_) => "internal",
        }
    }

    /// Status a run ends in when this error stops it. Rejections and
    /// cancellation signals are not failures.
    pub fn terminal_status(&self) -> RunStatus {
        match self {
            Self::ApprovalRejected { .. } | Self::Cancelled { .. } => RunStatus::Cancelled,
            _ => RunStatus::Failed,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Terminal cause recorded on a run that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RunFailure {
    /// Stage the engine was on when the error surfaced, if any
    pub stage: Option<StageId>,
    /// Classification from [`OrchestratorError::kind`]
    pub kind: &'static str,
    /// Rendered error message
    pub message: String,
}

impl RunFailure {
    pub fn from_error(stage: Option<StageId>, error: &OrchestratorError) -> Self {
        Self {
            stage,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_status_mapping() {
        let rejected = OrchestratorError::ApprovalRejected {
            stage: StageId::DocumentAssembly,
        };
        assert_eq!(rejected.terminal_status(), RunStatus::Cancelled);

        let cancelled = OrchestratorError::Cancelled {
            reason: "user".to_string(),
        };
        assert_eq!(cancelled.terminal_status(), RunStatus::Cancelled);

        let timeout = OrchestratorError::ApprovalTimeout {
            stage: StageId::DocumentAssembly,
        };
        assert_eq!(timeout.terminal_status(), RunStatus::Failed);

        let missing = OrchestratorError::DependencyMissing {
            stage: StageId::VisualDesign,
            key: ContextKey::FINDINGS,
        };
        assert_eq!(missing.terminal_status(), RunStatus::Failed);
    }

    #[test]
    fn test_tool_error_kind_classification() {
        let err = OrchestratorError::ToolInvocation {
            tool: ToolId::GenerateImage,
            kind: ToolErrorKind::Permanent,
            attempts: 1,
            message: "content policy".to_string(),
        };
        assert_eq!(err.kind(), "tool_invocation_permanent");
        assert!(err.to_string().contains("generate_image"));
    }

    #[test]
    fn test_artifact_write_display() {
        let err = OrchestratorError::artifact_write(
            "/tmp/report.html",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/tmp/report.html"));
        assert_eq!(err.kind(), "artifact_write");
    }

    #[test]
    fn test_run_failure_from_error() {
        let err = OrchestratorError::DependencyMissing {
            stage: StageId::ContentStructuring,
            key: ContextKey::VISUALS,
        };
        let failure = RunFailure::from_error(Some(StageId::ContentStructuring), &err);
        assert_eq!(failure.kind, "dependency_missing");
        assert!(failure.message.contains("visual_assets"));
    }
}
