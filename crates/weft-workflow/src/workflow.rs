use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use weft_capability::CapabilityType;
use weft_config::{StepDef, TRIGGER_REF, WorkflowDef};

use crate::error::WorkflowError;
use crate::graph::Graph;
use crate::step::{Step, Trigger};

static REF_PATTERN: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

static EXPRESSION_PATTERN: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\{\{(.*?)\}\}").expect("valid regex"));

static OUTPUTS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\.outputs\b").expect("valid regex")
});

/// A validated workflow, ready to be bound to capabilities and executed.
#[derive(Debug)]
pub struct Workflow {
  pub id: String,
  pub owner: String,
  pub name: String,
  pub triggers: Vec<Trigger>,
  steps: HashMap<String, Step>,
  graph: Graph,
}

impl Workflow {
  /// Validate a definition and build its graph.
  pub fn new(
    id: impl Into<String>,
    owner: impl Into<String>,
    name: impl Into<String>,
    definition: &WorkflowDef,
  ) -> Result<Self, WorkflowError> {
    let id = id.into();

    if definition.triggers.is_empty() {
      return Err(WorkflowError::NoTriggers);
    }

    let triggers = definition
      .triggers
      .iter()
      .enumerate()
      .map(|(index, t)| Trigger::new(&id, index, t.id.clone(), t.config.clone()))
      .collect();

    let groups = [
      (CapabilityType::Action, &definition.actions),
      (CapabilityType::Consensus, &definition.consensus),
      (CapabilityType::Target, &definition.targets),
    ];

    let mut declared: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    let mut steps = HashMap::new();
    for (capability_type, defs) in groups {
      for def in defs {
        validate_ref(&def.step_ref)?;
        if !seen.insert(def.step_ref.clone()) {
          return Err(WorkflowError::DuplicateRef(def.step_ref.clone()));
        }

        declared.push(def.step_ref.clone());
        steps.insert(
          def.step_ref.clone(),
          Step::new(
            def.step_ref.clone(),
            def.id.clone(),
            capability_type,
            dependencies(def),
            def.inputs.clone(),
            def.config.clone(),
          ),
        );
      }
    }

    let graph = Graph::new(declared.iter().map(|step_ref| {
      let step = &steps[step_ref];
      (step_ref.as_str(), &step.dependencies)
    }))?;

    Ok(Self {
      id,
      owner: owner.into(),
      name: name.into(),
      triggers,
      steps,
      graph,
    })
  }

  /// Look up a step by ref.
  pub fn vertex(&self, step_ref: &str) -> Result<&Step, WorkflowError> {
    self
      .steps
      .get(step_ref)
      .ok_or_else(|| WorkflowError::NotFound(step_ref.to_string()))
  }

  /// Refs of the steps depending on `step_ref` (which may be `trigger`).
  pub fn dependents(&self, step_ref: &str) -> Result<&[String], WorkflowError> {
    self.graph.dependents(step_ref)
  }

  /// Visit every step once, dependencies first. Stops at the first error.
  pub fn walk<E>(&self, mut visit: impl FnMut(&Step) -> Result<(), E>) -> Result<(), E> {
    for step_ref in self.graph.order() {
      visit(&self.steps[step_ref])?;
    }
    Ok(())
  }

  /// Every step, dependencies first.
  pub fn steps(&self) -> impl Iterator<Item = &Step> {
    self.graph.order().iter().map(|step_ref| &self.steps[step_ref])
  }

  /// Number of steps, excluding the trigger.
  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }
}

fn validate_ref(step_ref: &str) -> Result<(), WorkflowError> {
  if step_ref == TRIGGER_REF {
    return Err(WorkflowError::ReservedRef);
  }
  if !REF_PATTERN.is_match(step_ref) {
    return Err(WorkflowError::InvalidRef(step_ref.to_string()));
  }
  Ok(())
}

/// Explicit dependencies plus the refs whose outputs the inputs read.
fn dependencies(def: &StepDef) -> BTreeSet<String> {
  let mut deps: BTreeSet<String> = def.depends_on.iter().cloned().collect();
  for value in def.inputs.values() {
    collect_references(value, &mut deps);
  }

  if deps.is_empty() {
    deps.insert(TRIGGER_REF.to_string());
  }
  deps
}

fn collect_references(value: &Value, deps: &mut BTreeSet<String>) {
  match value {
    Value::String(s) => {
      for expression in EXPRESSION_PATTERN.captures_iter(s) {
        for reference in OUTPUTS_PATTERN.captures_iter(&expression[1]) {
          deps.insert(reference[1].to_string());
        }
      }
    }
    Value::Array(items) => items.iter().for_each(|v| collect_references(v, deps)),
    Value::Object(map) => map.values().for_each(|v| collect_references(v, deps)),
    _ => {}
  }
}
