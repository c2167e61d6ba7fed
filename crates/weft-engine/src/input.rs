//! Step input interpolation using minijinja.
//!
//! Step inputs are JSON templates. Every string leaf may contain
//! `{{ ... }}` expressions evaluated against the completed steps of the
//! execution:
//!
//! ```json
//! { "name": "{{ trigger.outputs.name }}", "greeting": "Hello {{ greet.outputs | upper }}!" }
//! ```
//!
//! A string made of a single expression keeps the type of the value it
//! evaluates to (`"{{ fetch.outputs }}"` can yield an object). Any other
//! string is rendered to a string. Referencing a step that has not completed
//! is an error.

use std::sync::LazyLock;

use minijinja::{Environment, UndefinedBehavior, Value};
use regex::Regex;
use serde_json::Map;
use weft_store::{StepStatus, WorkflowExecution};

use crate::error::{EngineError, ErrorKind};

static SINGLE_EXPRESSION: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^\s*\{\{([^{}]*)\}\}\s*$").expect("valid regex"));

/// Build the template context: `{ <ref>: { "outputs": ..., "inputs": ... } }`
/// for every completed step of `execution`, the trigger included.
pub fn execution_context(execution: &WorkflowExecution) -> serde_json::Value {
  let context: Map<String, serde_json::Value> = execution
    .steps
    .iter()
    .filter(|(_, step)| step.status == StepStatus::Completed)
    .map(|(step_ref, step)| {
      let mut vars = Map::new();
      vars.insert(
        "outputs".to_string(),
        step.outputs.value.clone().unwrap_or_default(),
      );
      vars.insert(
        "inputs".to_string(),
        step.inputs.clone().unwrap_or_default(),
      );
      (step_ref.clone(), serde_json::Value::Object(vars))
    })
    .collect();

  serde_json::Value::Object(context)
}

/// Interpolate a step's input template against an execution.
pub fn interpolate_inputs(
  step_ref: &str,
  inputs: &Map<String, serde_json::Value>,
  execution: &WorkflowExecution,
) -> Result<Map<String, serde_json::Value>, EngineError> {
  let mut env = Environment::new();
  env.set_undefined_behavior(UndefinedBehavior::Strict);

  let context = Value::from_serialize(execution_context(execution));

  inputs
    .iter()
    .map(|(key, template)| {
      let value = interpolate_value(&env, template, &context).map_err(|e| {
        EngineError::new(
          ErrorKind::Step,
          format!("failed to resolve input '{key}': {e}"),
        )
        .execution(&execution.execution_id)
        .step(step_ref)
      })?;
      Ok::<_, EngineError>((key.clone(), value))
    })
    .collect()
}

fn interpolate_value(
  env: &Environment,
  template: &serde_json::Value,
  context: &Value,
) -> Result<serde_json::Value, minijinja::Error> {
  match template {
    serde_json::Value::String(s) => interpolate_string(env, s, context),
    serde_json::Value::Array(items) => items
      .iter()
      .map(|item| interpolate_value(env, item, context))
      .collect::<Result<Vec<_>, _>>()
      .map(serde_json::Value::Array),
    serde_json::Value::Object(map) => map
      .iter()
      .map(|(k, v)| Ok((k.clone(), interpolate_value(env, v, context)?)))
      .collect::<Result<Map<_, _>, minijinja::Error>>()
      .map(serde_json::Value::Object),
    other => Ok(other.clone()),
  }
}

fn interpolate_string(
  env: &Environment,
  template: &str,
  context: &Value,
) -> Result<serde_json::Value, minijinja::Error> {
  if let Some(captures) = SINGLE_EXPRESSION.captures(template) {
    let expression = env.compile_expression(&captures[1])?;
    let value = expression.eval(context.clone())?;
    if value.is_undefined() {
      return Err(minijinja::Error::new(
        minijinja::ErrorKind::UndefinedError,
        format!("`{}` is undefined", captures[1].trim()),
      ));
    }
    return serde_json::to_value(&value).map_err(|e| {
      minijinja::Error::new(minijinja::ErrorKind::BadSerialization, e.to_string())
    });
  }

  if !template.contains("{{") && !template.contains("{%") {
    return Ok(serde_json::Value::String(template.to_string()));
  }

  env
    .render_str(template, context.clone())
    .map(serde_json::Value::String)
}
