//! Core abstractions for the orchestrator execution model.
//!
//! - [`Stage`] - Trait that all pipeline stages implement
//! - [`StageContext`] - Declared inputs, tools and artifacts available to a stage
//! - [`StageOutput`] - Payload and artifacts a stage returns
//! - [`ExecutionEngine`] - Runs the stage list for one run at a time

mod execution;
mod stage;

pub use execution::ExecutionEngine;
pub use stage::{Stage, StageContext, StageOutput};
