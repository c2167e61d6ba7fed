use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CapabilityError;

/// The kind of work a capability performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityType {
  /// Emits events that start executions.
  Trigger,
  /// Performs a computation or fetches data.
  Action,
  /// Produces a report agreed on by the DON.
  Consensus,
  /// Writes results to an external system.
  Target,
}

impl fmt::Display for CapabilityType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      CapabilityType::Trigger => "trigger",
      CapabilityType::Action => "action",
      CapabilityType::Consensus => "consensus",
      CapabilityType::Target => "target",
    };
    f.write_str(name)
  }
}

/// A set of cooperating nodes. Only the id is used by the engine for request
/// metadata; members are used to compute transmission schedules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Don {
  pub id: String,
  #[serde(default)]
  pub members: Vec<String>,
  #[serde(default)]
  pub f: u8,
}

/// Identity of the node the engine runs on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
  #[serde(default)]
  pub peer_id: Option<String>,
  pub workflow_don: Don,
}

/// Static description of a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityInfo {
  /// Globally scoped id, e.g. "streams-trigger@1.0.0"
  pub id: String,
  pub capability_type: CapabilityType,
  pub description: String,
  pub version: String,
  /// The DON serving this capability. `None` means the capability is local.
  #[serde(default)]
  pub don: Option<Don>,
}

impl CapabilityInfo {
  pub fn new(
    id: impl Into<String>,
    capability_type: CapabilityType,
    description: impl Into<String>,
    version: impl Into<String>,
  ) -> Self {
    Self {
      id: id.into(),
      capability_type,
      description: description.into(),
      version: version.into(),
      don: None,
    }
  }

  /// Attach the DON serving this capability.
  pub fn with_don(mut self, don: Don) -> Self {
    self.don = Some(don);
    self
  }

  /// Whether this capability runs on the local node only.
  pub fn is_local(&self) -> bool {
    self.don.is_none()
  }
}

/// Metadata attached to every capability request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMetadata {
  pub workflow_id: String,
  #[serde(default)]
  pub workflow_execution_id: String,
  pub workflow_owner: String,
  pub workflow_name: String,
  pub workflow_don_id: String,
}

/// A request to execute a capability, or to register a trigger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRequest {
  pub metadata: RequestMetadata,
  #[serde(default)]
  pub config: serde_json::Map<String, serde_json::Value>,
  #[serde(default)]
  pub inputs: serde_json::Map<String, serde_json::Value>,
}

/// One value (or error) emitted by a capability.
pub type CapabilityResponse = Result<serde_json::Value, CapabilityError>;

/// Metadata attached to workflow (de)registration requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationMetadata {
  pub workflow_id: String,
}

/// Binds a capability to a workflow before any step runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterToWorkflowRequest {
  pub metadata: RegistrationMetadata,
  #[serde(default)]
  pub config: serde_json::Map<String, serde_json::Value>,
}

/// Releases a capability from a workflow on shutdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnregisterFromWorkflowRequest {
  pub metadata: RegistrationMetadata,
  #[serde(default)]
  pub config: serde_json::Map<String, serde_json::Value>,
}

/// Event emitted by a trigger capability to start an execution.
///
/// `event_id` must be stable across redeliveries of the same event: the
/// engine derives the execution id from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
  pub event_id: String,
  pub trigger_type: String,
  /// Unix millis at which the event was emitted.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timestamp: Option<u64>,
  #[serde(default)]
  pub outputs: serde_json::Value,
}

impl TriggerEvent {
  pub fn new(
    event_id: impl Into<String>,
    trigger_type: impl Into<String>,
    outputs: serde_json::Value,
  ) -> Self {
    Self {
      event_id: event_id.into(),
      trigger_type: trigger_type.into(),
      timestamp: None,
      outputs,
    }
  }

  /// Wrap the event into the value carried by a trigger response.
  pub fn to_value(&self) -> serde_json::Value {
    serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
  }
}
