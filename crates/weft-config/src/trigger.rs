use serde::{Deserialize, Serialize};

/// A trigger subscription: which trigger capability to register with, and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDef {
  /// Capability id, e.g. "cron-trigger@1.0.0"
  pub id: String,

  /// Capability-specific configuration sent on registration.
  #[serde(default)]
  pub config: serde_json::Map<String, serde_json::Value>,
}
