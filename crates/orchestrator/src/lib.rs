pub mod approval;
pub mod artifacts;
pub mod cancellation;
pub mod config;
pub mod context_store;
pub mod core;
pub mod error;
pub mod prompts;
pub mod run_log;
pub mod session;
pub mod stages;
pub mod tools;

pub use approval::{ApprovalGate, ApprovalHandle, ApprovalSettings, SubmitOutcome};
pub use artifacts::ArtifactManager;
pub use cancellation::CancellationController;
pub use config::EngineConfig;
pub use context_store::ContextStore;
pub use crate::core::{ExecutionEngine, Stage, StageContext, StageOutput};
pub use error::{OrchestratorError, Result, RunFailure};
pub use run_log::RunLog;
pub use session::{RunHandle, RunSession};
pub use tools::{RetryPolicy, Toolset};
