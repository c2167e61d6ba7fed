use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
  #[error("workflow has no triggers")]
  NoTriggers,

  #[error("duplicate step ref: {0}")]
  DuplicateRef(String),

  #[error("step ref `trigger` is reserved")]
  ReservedRef,

  #[error("invalid step ref: {0:?} (expected an identifier)")]
  InvalidRef(String),

  #[error("step {step} depends on unknown step {dependency}")]
  UnknownDependency { step: String, dependency: String },

  #[error("cycle detected involving step: {0}")]
  CycleDetected(String),

  #[error("step not found: {0}")]
  NotFound(String),
}
