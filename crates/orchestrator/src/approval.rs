//! Human approval checkpoints.
//!
//! At most one request is pending per run. The engine side ([`ApprovalGate`])
//! blocks until a decision, the deadline or a cancellation signal; the
//! operator side ([`ApprovalHandle`]) submits free-text replies that are
//! matched against the request's decision tokens.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use carousel_core::{ApprovalRequest, ApprovalResolution, Decision, DecisionTokens, StageId};
use chrono::Utc;
use events::Event;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::cancellation::CancellationController;
use crate::error::{OrchestratorError, Result};
use crate::run_log::RunLog;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApprovalSettings {
    /// Resolve every request as approved without waiting
    pub auto_approve: bool,
    /// Maximum wait per request; `None` waits indefinitely
    pub deadline: Option<Duration>,
    pub tokens: DecisionTokens,
}

impl ApprovalSettings {
    pub fn auto() -> Self {
        Self {
            auto_approve: true,
            ..Self::default()
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Result of submitting a reply to the pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The reply resolved the request
    Accepted(Decision),
    /// The reply matched no token; the request stays pending
    Reprompt,
    /// Nothing is awaiting a decision
    NoPendingRequest,
}

struct Pending {
    request: ApprovalRequest,
    sender: oneshot::Sender<Decision>,
}

type Slot = Arc<Mutex<Option<Pending>>>;

fn lock(slot: &Slot) -> std::sync::MutexGuard<'_, Option<Pending>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ApprovalGate {
    settings: ApprovalSettings,
    log: Arc<RunLog>,
    slot: Slot,
}

impl ApprovalGate {
    pub fn new(settings: ApprovalSettings, log: Arc<RunLog>) -> Self {
        Self {
            settings,
            log,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn handle(&self) -> ApprovalHandle {
        ApprovalHandle {
            log: self.log.clone(),
            slot: self.slot.clone(),
        }
    }

    /// Raise a request and wait for it to resolve.
    ///
    /// Returns the resolved request; the caller decides what a rejection or
    /// timeout means. Fails only when cancellation interrupts the wait.
    pub async fn request(
        &self,
        stage: StageId,
        prompt: impl Into<String>,
        cancel: &CancellationController,
    ) -> Result<ApprovalRequest> {
        cancel.check()?;

        let mut request = ApprovalRequest::new(stage, prompt, self.settings.tokens.clone());
        if let Some(deadline) = self.settings.deadline {
            let delta = chrono::Duration::from_std(deadline)
                .map_err(|e| OrchestratorError::Config(format!("approval deadline: {}", e)))?;
            request = request.with_deadline(Utc::now() + delta);
        }

        if self.settings.auto_approve {
            self.emit_requested(&request);
            request.resolve(ApprovalResolution::Approved);
            self.emit_resolved(&request);
            return Ok(request);
        }

        // The slot is filled before observers hear about the request, so a
        // reply to the event always finds it pending.
        let (sender, mut receiver) = oneshot::channel();
        *lock(&self.slot) = Some(Pending {
            request: request.clone(),
            sender,
        });
        self.emit_requested(&request);

        let deadline = self.settings.deadline;
        let timer = async move {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        let resolution = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                lock(&self.slot).take();
                return Err(cancel.error());
            }
            decision = &mut receiver => match decision {
                Ok(decision) => ApprovalResolution::from(decision),
                Err(_) => {
                    return Err(OrchestratorError::Internal(
                        "approval channel closed without a decision".to_string(),
                    ))
                }
            },
            _ = timer => resolve_at_deadline(&self.slot, &mut receiver)?,
        };

        if resolution == ApprovalResolution::TimedOut {
            warn!(stage = %stage, request_id = %request.id, "Approval timed out");
        }
        request.resolve(resolution);
        self.emit_resolved(&request);
        Ok(request)
    }

    fn emit_requested(&self, request: &ApprovalRequest) {
        info!(stage = %request.stage, request_id = %request.id, "Approval requested");
        self.log.emit(Event::ApprovalRequested {
            run_id: self.log.run_id(),
            request_id: request.id,
            stage: request.stage.to_string(),
            prompt: request.prompt.clone(),
            deadline: request.deadline,
        });
    }

    fn emit_resolved(&self, request: &ApprovalRequest) {
        let resolution = request
            .resolution
            .map(|r| r.as_str())
            .unwrap_or("unresolved");
        info!(
            stage = %request.stage,
            request_id = %request.id,
            resolution,
            "Approval resolved"
        );
        self.log.emit(Event::ApprovalResolved {
            run_id: self.log.run_id(),
            request_id: request.id,
            stage: request.stage.to_string(),
            resolution: resolution.to_string(),
        });
    }
}

/// Resolution once the deadline fires. A reply accepted while the timer
/// was firing has already taken the slot and sent its decision, so that
/// decision stands.
fn resolve_at_deadline(
    slot: &Slot,
    receiver: &mut oneshot::Receiver<Decision>,
) -> Result<ApprovalResolution> {
    if lock(slot).take().is_some() {
        return Ok(ApprovalResolution::TimedOut);
    }
    // Senders only send while holding the slot lock, so the decision is
    // already in the channel.
    match receiver.try_recv() {
        Ok(decision) => Ok(ApprovalResolution::from(decision)),
        Err(_) => Err(OrchestratorError::Internal(
            "approval slot emptied without a decision".to_string(),
        )),
    }
}

/// Operator-side access to the pending request. Cheap to clone.
#[derive(Clone)]
pub struct ApprovalHandle {
    log: Arc<RunLog>,
    slot: Slot,
}

impl ApprovalHandle {
    /// Snapshot of the pending request, if any.
    pub fn pending(&self) -> Option<ApprovalRequest> {
        lock(&self.slot).as_ref().map(|p| p.request.clone())
    }

    /// Submit a free-text reply.
    pub fn submit(&self, reply: &str) -> SubmitOutcome {
        let mut slot = lock(&self.slot);
        let Some(pending) = slot.as_ref() else {
            return SubmitOutcome::NoPendingRequest;
        };

        let request_id = pending.request.id;
        match pending.request.tokens.classify(reply) {
            Some(decision) => {
                if let Some(pending) = slot.take() {
                    // The gate may have been dropped by a finished run.
                    let _ = pending.sender.send(decision);
                }
                SubmitOutcome::Accepted(decision)
            }
            None => {
                drop(slot);
                self.log.emit(Event::ApprovalReprompted {
                    run_id: self.log.run_id(),
                    request_id,
                    reply: reply.to_string(),
                });
                SubmitOutcome::Reprompt
            }
        }
    }

    pub fn approve(&self) -> SubmitOutcome {
        self.submit_decision(Decision::Approve)
    }

    pub fn reject(&self) -> SubmitOutcome {
        self.submit_decision(Decision::Reject)
    }

    fn submit_decision(&self, decision: Decision) -> SubmitOutcome {
        match lock(&self.slot).take() {
            Some(pending) => {
                let _ = pending.sender.send(decision);
                SubmitOutcome::Accepted(decision)
            }
            None => SubmitOutcome::NoPendingRequest,
        }
    }
}

impl std::fmt::Debug for ApprovalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalHandle")
            .field("pending", &self.pending().map(|r| r.id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn gate(settings: ApprovalSettings) -> (Arc<ApprovalGate>, Arc<RunLog>) {
        let log = Arc::new(RunLog::new(Uuid::new_v4()));
        (Arc::new(ApprovalGate::new(settings, log.clone())), log)
    }

    async fn wait_pending(handle: &ApprovalHandle) -> ApprovalRequest {
        loop {
            if let Some(request) = handle.pending() {
                return request;
            }
            tokio::task::yield_now().await;
        }
    }

    fn event_names(log: &RunLog) -> Vec<&'static str> {
        log.history().iter().map(|e| e.event.name()).collect()
    }

    #[test]
    fn test_decision_racing_deadline_is_honoured() {
        let (gate, _) = gate(ApprovalSettings::default());
        let handle = gate.handle();
        let (sender, mut receiver) = oneshot::channel();
        *lock(&gate.slot) = Some(Pending {
            request: ApprovalRequest::new(
                StageId::DocumentAssembly,
                "Assemble?",
                DecisionTokens::default(),
            ),
            sender,
        });

        // The reply lands after the timer fired but before the gate looked
        assert_eq!(handle.submit("no"), SubmitOutcome::Accepted(Decision::Reject));

        let resolution = resolve_at_deadline(&gate.slot, &mut receiver).unwrap();
        assert_eq!(resolution, ApprovalResolution::Rejected);
    }

    #[test]
    fn test_deadline_with_pending_slot_times_out() {
        let (gate, _) = gate(ApprovalSettings::default());
        let (sender, mut receiver) = oneshot::channel();
        *lock(&gate.slot) = Some(Pending {
            request: ApprovalRequest::new(
                StageId::DocumentAssembly,
                "Assemble?",
                DecisionTokens::default(),
            ),
            sender,
        });

        let resolution = resolve_at_deadline(&gate.slot, &mut receiver).unwrap();
        assert_eq!(resolution, ApprovalResolution::TimedOut);
        assert!(gate.handle().pending().is_none());
    }

    #[tokio::test]
    async fn test_auto_approve_resolves_immediately() {
        let (gate, log) = gate(ApprovalSettings::auto());
        let cancel = CancellationController::new();

        let request = gate
            .request(StageId::DocumentAssembly, "Assemble?", &cancel)
            .await
            .unwrap();

        assert_eq!(request.resolution, Some(ApprovalResolution::Approved));
        assert_eq!(
            event_names(&log),
            vec!["approval_requested", "approval_resolved"]
        );
    }

    #[tokio::test]
    async fn test_reply_approves() {
        let (gate, _) = gate(ApprovalSettings::default());
        let handle = gate.handle();
        let cancel = CancellationController::new();

        let waiter = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                gate.request(StageId::DocumentAssembly, "Assemble?", &cancel)
                    .await
            })
        };

        let pending = wait_pending(&handle).await;
        assert_eq!(pending.stage, StageId::DocumentAssembly);
        assert_eq!(handle.submit("Yes"), SubmitOutcome::Accepted(Decision::Approve));

        let request = waiter.await.unwrap().unwrap();
        assert_eq!(request.resolution, Some(ApprovalResolution::Approved));
        assert!(handle.pending().is_none());
    }

    #[tokio::test]
    async fn test_unmatched_reply_reprompts() {
        let (gate, log) = gate(ApprovalSettings::default());
        let handle = gate.handle();
        let cancel = CancellationController::new();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.request(StageId::DocumentAssembly, "Assemble?", &cancel)
                    .await
            })
        };

        wait_pending(&handle).await;
        assert_eq!(handle.submit("maybe later"), SubmitOutcome::Reprompt);
        assert!(handle.pending().is_some());
        assert_eq!(handle.submit("no"), SubmitOutcome::Accepted(Decision::Reject));

        let request = waiter.await.unwrap().unwrap();
        assert_eq!(request.resolution, Some(ApprovalResolution::Rejected));
        assert!(event_names(&log).contains(&"approval_reprompted"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_times_out() {
        let settings = ApprovalSettings::default().with_deadline(Duration::from_secs(30));
        let (gate, _) = gate(settings);
        let handle = gate.handle();
        let cancel = CancellationController::new();

        let request = gate
            .request(StageId::DocumentAssembly, "Assemble?", &cancel)
            .await
            .unwrap();

        assert_eq!(request.resolution, Some(ApprovalResolution::TimedOut));
        assert!(request.deadline.is_some());
        assert_eq!(handle.submit("yes"), SubmitOutcome::NoPendingRequest);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let (gate, _) = gate(ApprovalSettings::default());
        let handle = gate.handle();
        let cancel = CancellationController::new();

        let waiter = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                gate.request(StageId::DocumentAssembly, "Assemble?", &cancel)
                    .await
            })
        };

        wait_pending(&handle).await;
        cancel.cancel("user interrupt");

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, OrchestratorError::Cancelled { .. }));
        assert!(handle.pending().is_none());
    }

    #[test]
    fn test_submit_without_pending() {
        let (gate, log) = gate(ApprovalSettings::default());
        let handle = gate.handle();

        assert_eq!(handle.submit("yes"), SubmitOutcome::NoPendingRequest);
        assert_eq!(handle.approve(), SubmitOutcome::NoPendingRequest);
        assert!(log.is_empty());
    }
}
