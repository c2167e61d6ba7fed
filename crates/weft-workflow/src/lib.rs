//! Weft Workflow
//!
//! This crate turns a [`weft_config::WorkflowDef`] into a validated
//! [`Workflow`]: the static graph an engine executes.
//!
//! Key differences from `weft-config`:
//! - Refs are unique identifiers and `trigger` is reserved
//! - Dependencies are explicit edges, including those implied by
//!   `{{ ref.outputs }}` expressions in step inputs
//! - The graph is checked for unknown dependencies and cycles
//! - Each step and trigger carries a slot for the capability bound to it
//!   during engine initialization

mod error;
mod graph;
mod step;
mod workflow;

pub use error::WorkflowError;
pub use graph::Graph;
pub use step::{Step, Trigger};
pub use weft_config::TRIGGER_REF;
pub use workflow::Workflow;
