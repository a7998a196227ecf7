mod approval;
mod artifact;
mod context;
mod run;
mod stage;

pub use approval::{ApprovalRequest, ApprovalResolution, Decision, DecisionTokens};
pub use artifact::Artifact;
pub use context::ContextEntry;
pub use run::{AspectRatio, RunInput, RunStatus, DEFAULT_PERSONA, DEFAULT_SLIDE_COUNT, MAX_SLIDE_COUNT};
pub use stage::{ContextKey, StageDescriptor, StageId};
