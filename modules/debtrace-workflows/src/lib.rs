//! Workflow engine for the data-acquisition pipeline.
//!
//! Six workflow kinds share one `execute` choreography; a typed
//! registry maps `(source, workflow_type)` to a concrete extractor.
//! See [`engine`] for the lifecycle and [`registry`] for the wiring.

pub mod engine;
pub mod error;
pub mod registry;
pub mod sources;
pub mod strategies;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

#[cfg(test)]
mod engine_tests;

pub use engine::{ExecuteContext, Workflow};
pub use error::{Result, WorkflowError};
pub use registry::{sources_with_starter, starter_workflow, EngineDeps, WorkflowRegistry};
