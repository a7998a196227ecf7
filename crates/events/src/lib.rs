//! Event system for Carousel runs
//!
//! This crate provides the event bus and the status/log vocabulary an
//! external observer consumes while a pipeline run is in flight.

mod bus;
mod types;

pub use bus::EventBus;
pub use types::*;
