//! Execution engine: runs the stage list once per run, in order.
//!
//! For each stage the engine checks for cancellation, verifies declared
//! inputs, waits on the approval gate when the stage is gated, executes it
//! and records its output. The first error stops the run; nothing already
//! written is rolled back.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use carousel_core::{ApprovalResolution, RunInput, RunStatus};
use events::Event;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::stage::{Stage, StageContext};
use crate::approval::ApprovalGate;
use crate::artifacts::ArtifactManager;
use crate::cancellation::CancellationController;
use crate::config::EngineConfig;
use crate::error::{OrchestratorError, Result};
use crate::run_log::RunLog;
use crate::session::{RunHandle, RunSession};
use crate::stages::carousel_pipeline;
use crate::tools::{InvocationLog, ToolInvoker, Toolset};

/// Runs pipeline stages for one run at a time.
pub struct ExecutionEngine {
    config: EngineConfig,
    tools: Toolset,
    stages: Arc<Vec<Arc<dyn Stage>>>,
    active: Arc<Mutex<Option<Uuid>>>,
}

impl ExecutionEngine {
    /// Engine over the standard carousel pipeline.
    pub fn new(config: EngineConfig, tools: Toolset) -> Self {
        let stages = carousel_pipeline(config.extended_review);
        Self::with_stages(config, tools, stages)
    }

    /// Engine over a custom stage list, executed in the given order.
    pub fn with_stages(config: EngineConfig, tools: Toolset, stages: Vec<Arc<dyn Stage>>) -> Self {
        Self {
            config,
            tools,
            stages: Arc::new(stages),
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    /// Id of the run currently executing, if any.
    pub fn active_run(&self) -> Option<Uuid> {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate `input` and start a run in the background.
    ///
    /// Invalid input fails before any side effect. Only one run may execute
    /// per engine at a time.
    pub fn start(&self, input: RunInput) -> Result<RunHandle> {
        let input = input.validated()?;
        let run_id = Uuid::new_v4();
        let active = ActiveRun::acquire(self.active.clone(), run_id)?;

        let log = Arc::new(RunLog::new(run_id));
        let cancel = CancellationController::new();
        let gate = ApprovalGate::new(self.config.approval.clone(), log.clone());
        let approvals = gate.handle();
        let (status_tx, status_rx) = watch::channel(RunStatus::Pending);

        let driver = RunDriver {
            run_id,
            config: self.config.clone(),
            tools: self.tools.clone(),
            stages: self.stages.clone(),
            log: log.clone(),
            cancel: cancel.clone(),
            gate,
            status: status_tx,
            invocations: InvocationLog::new(),
        };

        info!(run_id = %run_id, topic = %input.topic, slides = input.slide_count, "Starting run");
        let join = tokio::spawn(async move {
            let _active = active;
            driver.drive(input).await
        });

        Ok(RunHandle::new(log, cancel, approvals, status_rx, join))
    }

    /// Start a run and wait for it to finish.
    pub async fn run(&self, input: RunInput) -> Result<RunSession> {
        self.start(input)?.wait().await
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("config", &self.config)
            .field("stages", &self.stages.len())
            .field("active_run", &self.active_run())
            .finish()
    }
}

/// Marks the engine busy for the lifetime of a run.
struct ActiveRun {
    slot: Arc<Mutex<Option<Uuid>>>,
}

impl ActiveRun {
    fn acquire(slot: Arc<Mutex<Option<Uuid>>>, run_id: Uuid) -> Result<Self> {
        {
            let mut current = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = *current {
                return Err(OrchestratorError::EngineBusy(existing));
            }
            *current = Some(run_id);
        }
        Ok(Self { slot })
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

struct RunDriver {
    run_id: Uuid,
    config: EngineConfig,
    tools: Toolset,
    stages: Arc<Vec<Arc<dyn Stage>>>,
    log: Arc<RunLog>,
    cancel: CancellationController,
    gate: ApprovalGate,
    status: watch::Sender<RunStatus>,
    invocations: InvocationLog,
}

impl RunDriver {
    async fn drive(self, input: RunInput) -> RunSession {
        let mut session = RunSession::new(self.run_id, input, &self.config.artifact_dir);
        session.start();
        self.status.send_replace(RunStatus::Running);

        self.log.emit(Event::RunStarted {
            run_id: self.run_id,
            topic: session.input.topic.clone(),
            stage_count: self.stages.len(),
        });

        let result = self.execute_stages(&mut session).await;
        session.invocations = self.invocations.snapshot();

        match result {
            Ok(()) => {
                session.complete();
                info!(
                    run_id = %self.run_id,
                    artifacts = session.artifacts.len(),
                    "Run completed"
                );
                self.log.emit(Event::RunCompleted {
                    run_id: self.run_id,
                    artifacts: session.artifacts.iter().map(|a| a.name.clone()).collect(),
                });
            }
            Err(err) => {
                session.terminate(&err);
                let stage = session.current_stage.map(|s| s.to_string());
                if session.status == RunStatus::Cancelled {
                    warn!(run_id = %self.run_id, stage = ?stage, "Run cancelled: {}", err);
                    self.log.emit(Event::RunCancelled {
                        run_id: self.run_id,
                        stage,
                        reason: cancel_reason(&err),
                    });
                } else {
                    error!(
                        run_id = %self.run_id,
                        stage = ?stage,
                        kind = err.kind(),
                        "Run failed: {}",
                        err
                    );
                    self.log.emit(Event::RunFailed {
                        run_id: self.run_id,
                        stage,
                        error_kind: err.kind().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        self.status.send_replace(session.status);
        session
    }

    async fn execute_stages(&self, session: &mut RunSession) -> Result<()> {
        let artifacts = ArtifactManager::new(&self.config.artifact_dir);

        self.cancel.check()?;
        let removed = artifacts.prepare_run().await?;
        self.log.emit(Event::ArtifactsCleared {
            run_id: self.run_id,
            removed: removed.iter().map(|p| p.display().to_string()).collect(),
        });

        for (index, stage) in self.stages.iter().enumerate() {
            let descriptor = stage.descriptor().clone();
            let stage_id = descriptor.id;
            session.enter_stage(stage_id);

            self.cancel.check()?;

            if let Some(key) = session.context.first_missing(&descriptor.inputs) {
                return Err(OrchestratorError::DependencyMissing {
                    stage: stage_id,
                    key: key.clone(),
                });
            }

            if descriptor.requires_approval {
                session.status = RunStatus::AwaitingApproval;
                self.status.send_replace(RunStatus::AwaitingApproval);

                let request = self
                    .gate
                    .request(
                        stage_id,
                        stage.approval_prompt(&session.input, &session.context),
                        &self.cancel,
                    )
                    .await?;
                session.approvals.push(request.clone());

                match request.resolution {
                    Some(ApprovalResolution::Approved) => {}
                    Some(ApprovalResolution::Rejected) => {
                        return Err(OrchestratorError::ApprovalRejected { stage: stage_id })
                    }
                    Some(ApprovalResolution::TimedOut) => {
                        return Err(OrchestratorError::ApprovalTimeout { stage: stage_id })
                    }
                    None => {
                        return Err(OrchestratorError::Internal(format!(
                            "approval for {} returned unresolved",
                            stage_id
                        )))
                    }
                }

                session.status = RunStatus::Running;
                self.status.send_replace(RunStatus::Running);
                self.cancel.check()?;
            }

            info!(run_id = %self.run_id, stage = %stage_id, index, "Stage started");
            self.log.emit(Event::StageStarted {
                run_id: self.run_id,
                stage: stage_id.to_string(),
                index,
            });
            let started = Instant::now();

            let mut invoker = ToolInvoker::new(
                stage_id,
                self.config.retry,
                self.cancel.clone(),
                self.log.clone(),
                self.invocations.clone(),
            );
            if !descriptor.retryable {
                invoker = invoker.without_retry();
            }

            let inputs = descriptor
                .inputs
                .iter()
                .filter_map(|key| session.context.entry(key).cloned())
                .collect();
            let ctx = StageContext::new(
                self.run_id,
                session.input.clone(),
                descriptor.clone(),
                inputs,
                self.tools.clone(),
                invoker,
                artifacts.clone(),
            );

            let output = stage.execute(&ctx).await?;

            session
                .context
                .insert(stage_id, descriptor.output.clone(), output.payload)?;

            for artifact in output.artifacts {
                self.log.emit(Event::ArtifactCommitted {
                    run_id: self.run_id,
                    stage: stage_id.to_string(),
                    name: artifact.name.clone(),
                    path: artifact.path.display().to_string(),
                });
                session.artifacts.push(artifact);
            }

            let duration_ms = started.elapsed().as_millis() as u64;
            info!(run_id = %self.run_id, stage = %stage_id, duration_ms, "Stage completed");
            self.log.emit(Event::StageCompleted {
                run_id: self.run_id,
                stage: stage_id.to_string(),
                output_key: descriptor.output.to_string(),
                duration_ms,
            });
        }

        Ok(())
    }
}

fn cancel_reason(err: &OrchestratorError) -> String {
    match err {
        OrchestratorError::Cancelled { reason } => reason.clone(),
        other => other.to_string(),
    }
}
