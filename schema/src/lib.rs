//! Schema definitions for brood
//!
//! This crate contains the data structures shared between the supervisor
//! core and its front ends. All types here implement JSON Schema generation
//! for external consumption.

pub mod events;
pub mod worker;

#[cfg(test)]
mod json_roundtrip_tests;

pub use events::{EventSeverity, SupervisorEvent};
pub use worker::{ExitStatus, WorkerExit, WorkerState};
