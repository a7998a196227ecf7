//! Uniform timeout, retry and classification around every tool call.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use carousel_core::StageId;
use chrono::{DateTime, Utc};
use events::Event;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::{ToolError, ToolErrorKind, ToolId};
use crate::cancellation::CancellationController;
use crate::error::{OrchestratorError, Result};
use crate::run_log::RunLog;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 30_000;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Budget for a single attempt
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Delay before the attempt following `attempt` (1-indexed).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationOutcome {
    Succeeded,
    Failed { kind: ToolErrorKind, message: String },
    Cancelled,
}

/// Record of one logical tool call, across all of its attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolInvocation {
    pub tool: ToolId,
    pub stage: StageId,
    pub attempts: u32,
    pub timeout_ms: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: InvocationOutcome,
}

/// Shared, append-only list of invocations made during a run.
#[derive(Debug, Clone, Default)]
pub struct InvocationLog {
    inner: Arc<Mutex<Vec<ToolInvocation>>>,
}

impl InvocationLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, invocation: ToolInvocation) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(invocation);
    }

    pub fn snapshot(&self) -> Vec<ToolInvocation> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Invokes tools on behalf of one stage.
#[derive(Clone)]
pub struct ToolInvoker {
    stage: StageId,
    policy: RetryPolicy,
    cancel: CancellationController,
    log: Arc<RunLog>,
    invocations: InvocationLog,
}

impl ToolInvoker {
    pub fn new(
        stage: StageId,
        policy: RetryPolicy,
        cancel: CancellationController,
        log: Arc<RunLog>,
        invocations: InvocationLog,
    ) -> Self {
        Self {
            stage,
            policy,
            cancel,
            log,
            invocations,
        }
    }

    /// Disable retries for stages that are not retryable.
    pub fn without_retry(mut self) -> Self {
        self.policy.max_attempts = 1;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn cancellation(&self) -> &CancellationController {
        &self.cancel
    }

    /// Run `op` under the per-attempt timeout, retrying transient failures
    /// with exponential backoff. Permanent failures and exhausted retries
    /// surface as [`OrchestratorError::ToolInvocation`]. A cancellation
    /// signal interrupts both the attempt and the backoff sleep.
    pub async fn invoke<T, F, Fut>(&self, tool: ToolId, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ToolError>>,
    {
        let started_at = Utc::now();
        let started = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            if self.cancel.is_cancelled() {
                self.finish(tool, attempt - 1, started_at, started, InvocationOutcome::Cancelled);
                return Err(self.cancel.error());
            }

            debug!(
                stage = %self.stage,
                tool = %tool,
                attempt,
                max_attempts,
                "Invoking tool"
            );

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.finish(tool, attempt, started_at, started, InvocationOutcome::Cancelled);
                    return Err(self.cancel.error());
                }
                res = tokio::time::timeout(self.policy.timeout, op()) => res,
            };

            let err = match result {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        info!(stage = %self.stage, tool = %tool, attempt, "Tool succeeded after retry");
                    }
                    self.finish(tool, attempt, started_at, started, InvocationOutcome::Succeeded);
                    return Ok(value);
                }
                Ok(Err(e)) => e,
                Err(_) => ToolError::transient(format!(
                    "timed out after {}s",
                    self.policy.timeout.as_secs_f64()
                )),
            };

            if err.is_transient() && attempt < max_attempts {
                let delay = self.policy.backoff_for(attempt);
                warn!(
                    stage = %self.stage,
                    tool = %tool,
                    error = %err.message,
                    delay_ms = delay.as_millis() as u64,
                    "Tool failed, retrying (attempt {}/{})",
                    attempt,
                    max_attempts
                );
                self.log.emit(Event::ToolRetry {
                    run_id: self.log.run_id(),
                    stage: self.stage.to_string(),
                    tool: tool.to_string(),
                    attempt,
                    max_attempts,
                    delay_ms: delay.as_millis() as u64,
                    error: err.message.clone(),
                });

                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        self.finish(tool, attempt, started_at, started, InvocationOutcome::Cancelled);
                        return Err(self.cancel.error());
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }

            error!(
                stage = %self.stage,
                tool = %tool,
                kind = %err.kind,
                attempts = attempt,
                "Tool failed: {}",
                err.message
            );
            self.finish(
                tool,
                attempt,
                started_at,
                started,
                InvocationOutcome::Failed {
                    kind: err.kind,
                    message: err.message.clone(),
                },
            );
            return Err(OrchestratorError::ToolInvocation {
                tool,
                kind: err.kind,
                attempts: attempt,
                message: err.message,
            });
        }
    }

    fn finish(
        &self,
        tool: ToolId,
        attempts: u32,
        started_at: DateTime<Utc>,
        started: Instant,
        outcome: InvocationOutcome,
    ) {
        self.invocations.record(ToolInvocation {
            tool,
            stage: self.stage,
            attempts,
            timeout_ms: self.policy.timeout.as_millis() as u64,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            outcome,
        });
    }
}

impl std::fmt::Debug for ToolInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolInvoker")
            .field("stage", &self.stage)
            .field("policy", &self.policy)
            .finish()
    }
}
