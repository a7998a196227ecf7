//! State of one pipeline run, and the handle observers hold while it runs.

use std::path::PathBuf;
use std::sync::Arc;

use carousel_core::{ApprovalRequest, Artifact, RunInput, RunStatus, StageId};
use chrono::{DateTime, Utc};
use events::EventEnvelope;
use futures::Stream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::approval::ApprovalHandle;
use crate::cancellation::CancellationController;
use crate::context_store::ContextStore;
use crate::error::{OrchestratorError, Result, RunFailure};
use crate::run_log::RunLog;
use crate::tools::ToolInvocation;

/// Everything recorded about a run. Returned to the caller once the run
/// reaches a terminal status.
#[derive(Debug, Clone)]
pub struct RunSession {
    pub id: Uuid,
    pub input: RunInput,
    pub status: RunStatus,
    pub current_stage: Option<StageId>,
    pub artifact_dir: PathBuf,
    pub context: ContextStore,
    pub artifacts: Vec<Artifact>,
    pub approvals: Vec<ApprovalRequest>,
    pub invocations: Vec<ToolInvocation>,
    pub failure: Option<RunFailure>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSession {
    pub fn new(id: Uuid, input: RunInput, artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            id,
            input,
            status: RunStatus::default(),
            current_stage: None,
            artifact_dir: artifact_dir.into(),
            context: ContextStore::new(),
            artifacts: Vec::new(),
            approvals: Vec::new(),
            invocations: Vec::new(),
            failure: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn enter_stage(&mut self, stage: StageId) {
        self.current_stage = Some(stage);
    }

    pub fn complete(&mut self) {
        self.status = RunStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    /// Stop the run on `error`. Only the first terminal cause is recorded.
    pub fn terminate(&mut self, error: &OrchestratorError) {
        if self.status.is_terminal() {
            return;
        }
        self.status = error.terminal_status();
        self.failure = Some(RunFailure::from_error(self.current_stage, error));
        self.finished_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }
}

/// Live view of a running pipeline.
pub struct RunHandle {
    run_id: Uuid,
    log: Arc<RunLog>,
    cancel: CancellationController,
    approvals: ApprovalHandle,
    status: watch::Receiver<RunStatus>,
    join: JoinHandle<RunSession>,
}

impl RunHandle {
    pub(crate) fn new(
        log: Arc<RunLog>,
        cancel: CancellationController,
        approvals: ApprovalHandle,
        status: watch::Receiver<RunStatus>,
        join: JoinHandle<RunSession>,
    ) -> Self {
        Self {
            run_id: log.run_id(),
            log,
            cancel,
            approvals,
            status,
            join,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status transition.
    pub fn status_watch(&self) -> watch::Receiver<RunStatus> {
        self.status.clone()
    }

    /// Replay the run's events so far, then follow live ones.
    pub fn events(&self) -> impl Stream<Item = EventEnvelope> + Send + 'static {
        self.log.history_plus_stream()
    }

    pub fn history(&self) -> Vec<EventEnvelope> {
        self.log.history()
    }

    pub fn approvals(&self) -> &ApprovalHandle {
        &self.approvals
    }

    pub fn cancellation(&self) -> &CancellationController {
        &self.cancel
    }

    /// Signal cancellation; returns false if already signalled.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        self.cancel.cancel(reason)
    }

    /// Wait for the run to reach a terminal status.
    pub async fn wait(self) -> Result<RunSession> {
        self.join
            .await
            .map_err(|e| OrchestratorError::Internal(format!("run task failed: {}", e)))
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .field("status", &self.status())
            .finish()
    }
}
