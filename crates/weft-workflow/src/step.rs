use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde_json::{Map, Value};
use weft_capability::{CallbackCapability, CapabilityType, TriggerCapability};

/// A step of a workflow, bound to an action, consensus or target capability.
pub struct Step {
  pub step_ref: String,
  /// Id of the capability executing this step.
  pub capability_id: String,
  /// The group the step was declared in.
  pub capability_type: CapabilityType,
  /// Refs this step waits for. Always non-empty: a step without explicit or
  /// implied dependencies depends on the trigger.
  pub dependencies: BTreeSet<String>,
  /// Raw input template, interpolated per execution.
  pub inputs: Map<String, Value>,
  pub config: Map<String, Value>,
  capability: OnceLock<Arc<dyn CallbackCapability>>,
}

impl Step {
  pub(crate) fn new(
    step_ref: String,
    capability_id: String,
    capability_type: CapabilityType,
    dependencies: BTreeSet<String>,
    inputs: Map<String, Value>,
    config: Map<String, Value>,
  ) -> Self {
    Self {
      step_ref,
      capability_id,
      capability_type,
      dependencies,
      inputs,
      config,
      capability: OnceLock::new(),
    }
  }

  /// The capability bound to this step, once initialization bound it.
  pub fn capability(&self) -> Option<&Arc<dyn CallbackCapability>> {
    self.capability.get()
  }

  /// Bind the capability. Returns false if one was already bound.
  pub fn bind(&self, capability: Arc<dyn CallbackCapability>) -> bool {
    self.capability.set(capability).is_ok()
  }
}

impl fmt::Debug for Step {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Step")
      .field("step_ref", &self.step_ref)
      .field("capability_id", &self.capability_id)
      .field("capability_type", &self.capability_type)
      .field("dependencies", &self.dependencies)
      .field("bound", &self.capability.get().is_some())
      .finish()
  }
}

/// A trigger subscription of a workflow.
pub struct Trigger {
  /// Id of the trigger capability.
  pub capability_id: String,
  pub config: Map<String, Value>,
  /// Per-workflow id, `wf_<workflow id>_trigger_<index>`.
  pub trigger_id: String,
  capability: OnceLock<Arc<dyn TriggerCapability>>,
}

impl Trigger {
  pub(crate) fn new(workflow_id: &str, index: usize, capability_id: String, config: Map<String, Value>) -> Self {
    Self {
      capability_id,
      config,
      trigger_id: format!("wf_{workflow_id}_trigger_{index}"),
      capability: OnceLock::new(),
    }
  }

  pub fn capability(&self) -> Option<&Arc<dyn TriggerCapability>> {
    self.capability.get()
  }

  /// Bind the trigger capability. Returns false if one was already bound.
  pub fn bind(&self, capability: Arc<dyn TriggerCapability>) -> bool {
    self.capability.set(capability).is_ok()
  }
}

impl fmt::Debug for Trigger {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Trigger")
      .field("capability_id", &self.capability_id)
      .field("trigger_id", &self.trigger_id)
      .field("bound", &self.capability.get().is_some())
      .finish()
  }
}
