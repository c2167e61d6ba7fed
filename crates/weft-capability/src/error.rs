use thiserror::Error;

use crate::types::CapabilityType;

/// Errors returned by capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
  /// The capability asks the engine to stop the execution successfully.
  ///
  /// This is not a failure: the step is recorded as an early exit and the
  /// whole execution finishes without running the remaining steps.
  #[error("execution stopped by capability")]
  StopExecution,

  /// The request was malformed (bad config, bad inputs).
  #[error("invalid request: {message}")]
  InvalidRequest { message: String },

  /// The capability failed to perform the work.
  #[error("capability failed: {message}")]
  Failed { message: String },

  /// The call was cancelled before it completed.
  #[error("capability call cancelled")]
  Cancelled,
}

impl CapabilityError {
  /// Create an invalid request error.
  pub fn invalid_request(message: impl Into<String>) -> Self {
    Self::InvalidRequest {
      message: message.into(),
    }
  }

  /// Create a generic failure.
  pub fn failed(message: impl Into<String>) -> Self {
    Self::Failed {
      message: message.into(),
    }
  }
}

/// Errors returned by a capability registry.
#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("capability not found: {id}")]
  NotFound { id: String },

  #[error("capability with id: {id} already exists")]
  AlreadyExists { id: String },

  /// The capability's execution contract does not match its declared type.
  #[error("capability {id} of type {capability_type} does not satisfy the {expected} contract")]
  ContractMismatch {
    id: String,
    capability_type: CapabilityType,
    expected: &'static str,
  },

  /// A typed lookup found a capability of another type.
  #[error("capability {id} is of type {actual}, expected {expected}")]
  WrongType {
    id: String,
    expected: CapabilityType,
    actual: CapabilityType,
  },
}
