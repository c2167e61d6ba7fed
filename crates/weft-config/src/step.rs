use serde::{Deserialize, Serialize};

/// A single step of a workflow, bound to one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
  /// Capability id, e.g. "echo@1.0.0"
  pub id: String,

  /// Unique reference of this step within the workflow.
  #[serde(rename = "ref")]
  pub step_ref: String,

  /// Explicit dependencies, in addition to those implied by `inputs`.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub depends_on: Vec<String>,

  /// Input template. String leaves may contain `{{ ... }}` expressions that
  /// reference the outputs of other steps.
  #[serde(default)]
  pub inputs: serde_json::Map<String, serde_json::Value>,

  /// Capability-specific configuration, passed through untouched.
  #[serde(default)]
  pub config: serde_json::Map<String, serde_json::Value>,
}
