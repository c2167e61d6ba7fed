//! Weft Config
//!
//! This crate contains the serializable workflow definition types for Weft.
//! These types represent a workflow before it is validated and turned into a
//! graph by `weft-workflow`.
//!
//! A definition lists the triggers that start executions and the steps that
//! run in response, grouped by capability kind:
//!
//! ```json
//! {
//!   "triggers": [{ "id": "stdin-trigger@1.0.0", "config": {} }],
//!   "actions": [
//!     { "id": "echo@1.0.0", "ref": "greet", "inputs": { "name": "{{ trigger.outputs.name }}" } }
//!   ],
//!   "targets": [
//!     { "id": "log@1.0.0", "ref": "write", "inputs": { "value": "{{ greet.outputs }}" } }
//!   ]
//! }
//! ```

mod step;
mod trigger;
mod workflow;

pub use step::StepDef;
pub use trigger::TriggerDef;
pub use workflow::WorkflowDef;

/// Reserved ref naming the implicit trigger step of every workflow.
pub const TRIGGER_REF: &str = "trigger";
