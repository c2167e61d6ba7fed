//! Capabilities bundled with the `weft` binary.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use weft_capability::{
  CallbackCapability, Capability, CapabilityError, CapabilityInfo, CapabilityRequest,
  CapabilityType, RegisterToWorkflowRequest, ResponseStream, TriggerCapability, TriggerEvent,
  UnregisterFromWorkflowRequest, respond,
};

pub const STDIN_TRIGGER_ID: &str = "stdin-trigger@1.0.0";
pub const ECHO_ID: &str = "echo@1.0.0";
pub const LOG_ID: &str = "log@1.0.0";

/// Emits one event per JSON line read from stdin.
pub struct StdinTrigger {
  info: CapabilityInfo,
  emitted: Arc<AtomicUsize>,
  eof: CancellationToken,
}

impl StdinTrigger {
  pub fn new() -> Self {
    Self {
      info: CapabilityInfo::new(
        STDIN_TRIGGER_ID,
        CapabilityType::Trigger,
        "one event per JSON line on stdin",
        "1.0.0",
      ),
      emitted: Arc::new(AtomicUsize::new(0)),
      eof: CancellationToken::new(),
    }
  }

  /// Number of events emitted so far.
  pub fn emitted(&self) -> usize {
    self.emitted.load(Ordering::SeqCst)
  }

  /// Cancelled once stdin is exhausted.
  pub fn eof(&self) -> CancellationToken {
    self.eof.clone()
  }
}

impl Default for StdinTrigger {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl TriggerCapability for StdinTrigger {
  fn info(&self) -> &CapabilityInfo {
    &self.info
  }

  async fn register_trigger(
    &self,
    request: CapabilityRequest,
  ) -> Result<ResponseStream, CapabilityError> {
    let trigger_id = request
      .inputs
      .get("triggerId")
      .and_then(Value::as_str)
      .unwrap_or_default()
      .to_string();
    let (sender, receiver) = mpsc::channel(16);
    let emitted = self.emitted.clone();
    let eof = self.eof.clone();

    tokio::spawn(async move {
      let mut lines = BufReader::new(tokio::io::stdin()).lines();
      loop {
        let line = match lines.next_line().await {
          Ok(Some(line)) => line,
          Ok(None) => break,
          Err(e) => {
            warn!(trigger_id = %trigger_id, error = %e, "failed to read stdin");
            break;
          }
        };
        if line.trim().is_empty() {
          continue;
        }

        let outputs: Value = match serde_json::from_str(&line) {
          Ok(outputs) => outputs,
          Err(e) => {
            warn!(trigger_id = %trigger_id, error = %e, "skipping line that is not JSON");
            continue;
          }
        };

        let mut event = TriggerEvent::new(uuid::Uuid::new_v4().to_string(), "stdin", outputs);
        event.timestamp = u64::try_from(chrono::Utc::now().timestamp_millis()).ok();
        debug!(trigger_id = %trigger_id, event_id = %event.event_id, "emitting event");

        if sender.send(Ok(event.to_value())).await.is_err() {
          debug!(trigger_id = %trigger_id, "trigger unregistered, stop reading stdin");
          return;
        }
        emitted.fetch_add(1, Ordering::SeqCst);
      }
      debug!(trigger_id = %trigger_id, "stdin closed");
      eof.cancel();
    });

    Ok(receiver)
  }

  async fn unregister_trigger(&self, _request: CapabilityRequest) -> Result<(), CapabilityError> {
    Ok(())
  }
}

/// A callback capability computing its result from the request alone.
struct Builtin {
  info: CapabilityInfo,
  run: fn(&CapabilityInfo, CapabilityRequest) -> Value,
}

#[async_trait]
impl CallbackCapability for Builtin {
  fn info(&self) -> &CapabilityInfo {
    &self.info
  }

  async fn register_to_workflow(
    &self,
    _request: RegisterToWorkflowRequest,
  ) -> Result<(), CapabilityError> {
    Ok(())
  }

  async fn unregister_from_workflow(
    &self,
    _request: UnregisterFromWorkflowRequest,
  ) -> Result<(), CapabilityError> {
    Ok(())
  }

  async fn execute(
    &self,
    request: CapabilityRequest,
    _cancel: CancellationToken,
  ) -> Result<ResponseStream, CapabilityError> {
    Ok(respond([Ok((self.run)(&self.info, request))]))
  }
}

/// Action returning its inputs unchanged.
pub fn echo() -> Capability {
  Capability::Callback(Arc::new(Builtin {
    info: CapabilityInfo::new(ECHO_ID, CapabilityType::Action, "returns its inputs", "1.0.0"),
    run: |_, request| Value::Object(request.inputs),
  }))
}

/// Local target writing its inputs to the log.
pub fn log() -> Capability {
  Capability::Callback(Arc::new(Builtin {
    info: CapabilityInfo::new(LOG_ID, CapabilityType::Target, "logs its inputs", "1.0.0"),
    run: |info, request| {
      let inputs = Value::Object(request.inputs);
      info!(
        capability_id = %info.id,
        execution_id = %request.metadata.workflow_execution_id,
        inputs = %inputs,
        "target_transmitted"
      );
      inputs
    },
  }))
}

#[cfg(test)]
mod tests {
  use super::*;
  use weft_capability::execute_sync;

  fn callback(capability: Capability) -> Arc<dyn CallbackCapability> {
    match capability {
      Capability::Callback(c) => c,
      Capability::Trigger(_) => panic!("expected a callback capability"),
    }
  }

  #[tokio::test]
  async fn test_echo_returns_inputs() {
    let echo = callback(echo());
    let mut request = CapabilityRequest::default();
    request.inputs.insert("a".to_string(), Value::from(1));

    let values = execute_sync(echo.as_ref(), request, CancellationToken::new())
      .await
      .unwrap();
    assert_eq!(values, vec![serde_json::json!({ "a": 1 })]);
  }

  #[test]
  fn test_log_is_a_local_target() {
    let log = log();
    assert_eq!(log.info().capability_type, CapabilityType::Target);
    assert!(log.info().is_local());
  }
}
