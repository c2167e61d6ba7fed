use std::collections::{BTreeSet, HashMap};

use weft_config::TRIGGER_REF;

use crate::error::WorkflowError;

/// Dependency structure of a workflow's steps.
#[derive(Debug, Clone)]
pub struct Graph {
  /// ref -> refs of the steps depending on it, in declaration order.
  dependents: HashMap<String, Vec<String>>,
  /// Every step ref, dependencies before dependents.
  order: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
  White,
  Gray,
  Black,
}

impl Graph {
  /// Build the graph from `(ref, dependencies)` pairs given in declaration
  /// order. Fails on unknown dependencies and cycles.
  pub fn new<'a>(
    steps: impl IntoIterator<Item = (&'a str, &'a BTreeSet<String>)>,
  ) -> Result<Self, WorkflowError> {
    let steps: Vec<(&str, &BTreeSet<String>)> = steps.into_iter().collect();

    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    dependents.insert(TRIGGER_REF.to_string(), Vec::new());
    for (step_ref, _) in &steps {
      dependents.insert(step_ref.to_string(), Vec::new());
    }

    for (step_ref, dependencies) in &steps {
      for dependency in dependencies.iter() {
        let Some(list) = dependents.get_mut(dependency) else {
          return Err(WorkflowError::UnknownDependency {
            step: step_ref.to_string(),
            dependency: dependency.clone(),
          });
        };
        list.push(step_ref.to_string());
      }
    }

    let adjacency: HashMap<&str, &BTreeSet<String>> = steps.iter().copied().collect();
    let mut color: HashMap<&str, Color> = steps.iter().map(|(r, _)| (*r, Color::White)).collect();
    let mut order = Vec::with_capacity(steps.len());

    // DFS over dependencies; a gray neighbour is a back edge
    fn visit<'a>(
      node: &'a str,
      adjacency: &HashMap<&'a str, &'a BTreeSet<String>>,
      color: &mut HashMap<&'a str, Color>,
      order: &mut Vec<String>,
    ) -> Result<(), WorkflowError> {
      color.insert(node, Color::Gray);

      if let Some(&dependencies) = adjacency.get(node) {
        for dependency in dependencies.iter() {
          let dependency = dependency.as_str();
          match color.get(dependency) {
            Some(Color::Gray) => return Err(WorkflowError::CycleDetected(dependency.to_string())),
            Some(Color::White) => visit(dependency, adjacency, color, order)?,
            // trigger, or already visited
            _ => {}
          }
        }
      }

      color.insert(node, Color::Black);
      order.push(node.to_string());
      Ok(())
    }

    for (step_ref, _) in &steps {
      if color.get(step_ref) == Some(&Color::White) {
        visit(*step_ref, &adjacency, &mut color, &mut order)?;
      }
    }

    Ok(Self { dependents, order })
  }

  /// Steps whose dependencies include `step_ref`.
  pub fn dependents(&self, step_ref: &str) -> Result<&[String], WorkflowError> {
    self
      .dependents
      .get(step_ref)
      .map(|v| v.as_slice())
      .ok_or_else(|| WorkflowError::NotFound(step_ref.to_string()))
  }

  /// Every step ref, dependencies before dependents.
  pub fn order(&self) -> &[String] {
    &self.order
  }
}
