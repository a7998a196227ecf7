//! Run-wide cancellation signal.
//!
//! One controller per run. The engine checks it between stages and before
//! every tool attempt, and awaits it alongside approval waits and backoff
//! sleeps so a signal interrupts them promptly.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{OrchestratorError, Result};

#[derive(Clone, Debug, Default)]
pub struct CancellationController {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Returns false if the run was already cancelled;
    /// the first reason wins.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        if self.reason.set(reason.clone()).is_err() {
            return false;
        }
        info!(reason = %reason, "Run cancellation requested");
        self.token.cancel();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }

    /// Resolves once cancellation is signalled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Fail fast with [`OrchestratorError::Cancelled`] if a signal arrived.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(self.error());
        }
        Ok(())
    }

    pub(crate) fn error(&self) -> OrchestratorError {
        OrchestratorError::Cancelled {
            reason: self.reason().unwrap_or("cancelled").to_string(),
        }
    }
}
