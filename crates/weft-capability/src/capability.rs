//! Capability execution contracts.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::CapabilityError;
use crate::types::{
  CapabilityInfo, CapabilityRequest, CapabilityResponse, RegisterToWorkflowRequest,
  UnregisterFromWorkflowRequest,
};

/// Stream of responses emitted by a capability.
pub type ResponseStream = mpsc::Receiver<CapabilityResponse>;

/// A capability that emits events asynchronously once registered.
#[async_trait]
pub trait TriggerCapability: Send + Sync {
  fn info(&self) -> &CapabilityInfo;

  /// Start emitting events for the trigger described by `request`.
  ///
  /// The returned stream stays open for as long as the trigger is active;
  /// closing it ends the subscription.
  async fn register_trigger(
    &self,
    request: CapabilityRequest,
  ) -> Result<ResponseStream, CapabilityError>;

  /// Stop emitting events for the trigger described by `request`.
  async fn unregister_trigger(&self, request: CapabilityRequest) -> Result<(), CapabilityError>;
}

/// A capability invoked once per step: actions, consensus and targets.
///
/// Results are delivered through a callback stream which is closed once the
/// capability is done. Use [`execute_sync`] to collect them.
#[async_trait]
pub trait CallbackCapability: Send + Sync {
  fn info(&self) -> &CapabilityInfo;

  async fn register_to_workflow(
    &self,
    request: RegisterToWorkflowRequest,
  ) -> Result<(), CapabilityError>;

  async fn unregister_from_workflow(
    &self,
    request: UnregisterFromWorkflowRequest,
  ) -> Result<(), CapabilityError>;

  async fn execute(
    &self,
    request: CapabilityRequest,
    cancel: CancellationToken,
  ) -> Result<ResponseStream, CapabilityError>;
}

/// A registered capability, tagged with its execution contract.
#[derive(Clone)]
pub enum Capability {
  Trigger(Arc<dyn TriggerCapability>),
  Callback(Arc<dyn CallbackCapability>),
}

impl Capability {
  pub fn info(&self) -> &CapabilityInfo {
    match self {
      Capability::Trigger(trigger) => trigger.info(),
      Capability::Callback(callback) => callback.info(),
    }
  }

  pub fn id(&self) -> &str {
    &self.info().id
  }

  /// Name of the execution contract, for error messages.
  pub fn contract(&self) -> &'static str {
    match self {
      Capability::Trigger(_) => "trigger",
      Capability::Callback(_) => "callback",
    }
  }
}

impl fmt::Debug for Capability {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Capability")
      .field("contract", &self.contract())
      .field("info", self.info())
      .finish()
  }
}

/// Execute a callback capability and wait for all of its responses.
///
/// Returns the emitted values in order, or the first error emitted.
pub async fn execute_sync(
  capability: &dyn CallbackCapability,
  request: CapabilityRequest,
  cancel: CancellationToken,
) -> Result<Vec<serde_json::Value>, CapabilityError> {
  let mut responses = capability.execute(request, cancel.clone()).await?;
  let mut values = Vec::new();

  loop {
    tokio::select! {
      _ = cancel.cancelled() => return Err(CapabilityError::Cancelled),
      response = responses.recv() => match response {
        Some(Ok(value)) => values.push(value),
        Some(Err(e)) => return Err(e),
        None => break,
      },
    }
  }

  Ok(values)
}

/// Build an already-closed response stream from a fixed set of responses.
///
/// Convenient for capabilities that compute their result synchronously.
pub fn respond(responses: impl IntoIterator<Item = CapabilityResponse>) -> ResponseStream {
  let responses: Vec<_> = responses.into_iter().collect();
  let (sender, receiver) = mpsc::channel(responses.len().max(1));
  for response in responses {
    // capacity matches the number of responses, so this cannot fail
    let _ = sender.try_send(response);
  }
  receiver
}
