use serde::{Deserialize, Serialize};

use crate::step::StepDef;
use crate::trigger::TriggerDef;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  pub triggers: Vec<TriggerDef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub actions: Vec<StepDef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub consensus: Vec<StepDef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub targets: Vec<StepDef>,
}

impl WorkflowDef {
  /// Parse a definition from JSON.
  pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(source)
  }

  /// Iterate over every step, in declaration order: actions, consensus, targets.
  pub fn steps(&self) -> impl Iterator<Item = &StepDef> {
    self
      .actions
      .iter()
      .chain(self.consensus.iter())
      .chain(self.targets.iter())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_definition() {
    let def = WorkflowDef::from_json(
      r#"{
        "triggers": [{ "id": "mock-trigger@1.0.0", "config": { "interval": 10 } }],
        "actions": [{ "id": "echo@1.0.0", "ref": "a", "inputs": { "x": "{{ trigger.outputs }}" } }],
        "targets": [{ "id": "log@1.0.0", "ref": "b", "depends_on": ["a"] }]
      }"#,
    )
    .unwrap();

    assert_eq!(def.triggers.len(), 1);
    assert_eq!(def.triggers[0].config["interval"], 10);
    assert!(def.consensus.is_empty());

    let refs: Vec<&str> = def.steps().map(|s| s.step_ref.as_str()).collect();
    assert_eq!(refs, vec!["a", "b"]);
    assert_eq!(def.targets[0].depends_on, vec!["a".to_string()]);
  }

  #[test]
  fn test_ref_is_renamed() {
    let def = WorkflowDef {
      triggers: vec![],
      actions: vec![StepDef {
        id: "echo@1.0.0".to_string(),
        step_ref: "a".to_string(),
        depends_on: vec![],
        inputs: Default::default(),
        config: Default::default(),
      }],
      ..Default::default()
    };

    let json = serde_json::to_value(&def).unwrap();
    assert_eq!(json["actions"][0]["ref"], "a");
    assert!(json.get("targets").is_none());
  }
}
