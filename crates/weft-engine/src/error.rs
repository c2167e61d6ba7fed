//! Engine error type.
//!
//! Every failure the engine reports is an [`EngineError`]: a [`ErrorKind`]
//! saying which part of the engine failed, the identifiers involved, a
//! human-readable reason and the underlying error, if any.

use std::fmt;

/// Boxed error returned by pluggable components (node resolvers, stores).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Which part of the engine an error comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  /// Invalid workflow definition or failed workflow initialization.
  Workflow,
  /// Creating or updating an execution failed.
  Execution,
  /// A capability could not be resolved or registered.
  Capability,
  /// Registering or unregistering a trigger failed.
  Trigger,
  /// A step could not be prepared (lookup, inputs).
  Step,
  /// A capability call made by a step failed.
  StepExecution,
  /// The execution store failed.
  Store,
  /// The engine was started or closed in the wrong state.
  Lifecycle,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ErrorKind::Workflow => "workflow",
      ErrorKind::Execution => "execution",
      ErrorKind::Capability => "capability",
      ErrorKind::Trigger => "trigger",
      ErrorKind::Step => "step",
      ErrorKind::StepExecution => "step execution",
      ErrorKind::Store => "store",
      ErrorKind::Lifecycle => "lifecycle",
    };
    f.write_str(name)
  }
}

/// Identifiers attached to an error. Absent fields are not rendered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
  pub workflow_id: Option<String>,
  pub execution_id: Option<String>,
  pub capability_id: Option<String>,
  pub trigger_id: Option<String>,
  pub step_ref: Option<String>,
}

impl ErrorContext {
  pub fn is_empty(&self) -> bool {
    self == &Self::default()
  }
}

impl fmt::Display for ErrorContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let fields = [
      ("workflow_id", &self.workflow_id),
      ("execution_id", &self.execution_id),
      ("capability_id", &self.capability_id),
      ("trigger_id", &self.trigger_id),
      ("step_ref", &self.step_ref),
    ];

    let mut first = true;
    for (name, value) in fields {
      let Some(value) = value else { continue };
      f.write_str(if first { " [" } else { ", " })?;
      write!(f, "{name}={value}")?;
      first = false;
    }
    if !first {
      f.write_str("]")?;
    }
    Ok(())
  }
}

/// An error raised by the engine.
#[derive(Debug, thiserror::Error)]
#[error("{kind} error{context}: {reason}")]
pub struct EngineError {
  pub kind: ErrorKind,
  pub context: ErrorContext,
  pub reason: String,
  #[source]
  pub source: Option<BoxError>,
}

impl EngineError {
  pub fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
    Self {
      kind,
      context: ErrorContext::default(),
      reason: reason.into(),
      source: None,
    }
  }

  pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
    self.source = Some(source.into());
    self
  }

  pub fn workflow(mut self, workflow_id: impl Into<String>) -> Self {
    self.context.workflow_id = Some(workflow_id.into());
    self
  }

  pub fn execution(mut self, execution_id: impl Into<String>) -> Self {
    self.context.execution_id = Some(execution_id.into());
    self
  }

  pub fn capability(mut self, capability_id: impl Into<String>) -> Self {
    self.context.capability_id = Some(capability_id.into());
    self
  }

  pub fn trigger(mut self, trigger_id: impl Into<String>) -> Self {
    self.context.trigger_id = Some(trigger_id.into());
    self
  }

  pub fn step(mut self, step_ref: impl Into<String>) -> Self {
    self.context.step_ref = Some(step_ref.into());
    self
  }

  pub(crate) fn lifecycle(reason: impl Into<String>) -> Self {
    Self::new(ErrorKind::Lifecycle, reason)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::error::Error as _;

  #[test]
  fn test_display_without_context() {
    let err = EngineError::lifecycle("engine already started");
    assert_eq!(err.to_string(), "lifecycle error: engine already started");
    assert!(err.context.is_empty());
  }

  #[test]
  fn test_display_with_context_and_source() {
    let source = std::io::Error::other("connection reset");
    let err = EngineError::new(ErrorKind::Capability, "failed to get capability")
      .workflow("wf-1")
      .capability("echo@1.0.0")
      .with_source(source);

    assert_eq!(
      err.to_string(),
      "capability error [workflow_id=wf-1, capability_id=echo@1.0.0]: failed to get capability"
    );
    assert_eq!(err.source().unwrap().to_string(), "connection reset");
  }
}
