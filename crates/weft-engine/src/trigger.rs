//! Trigger registration and event fan-in.
//!
//! Each registered trigger gets one forwarding task that relays the
//! responses of its stream to the scheduling loop, tagged with the trigger
//! id.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use weft_capability::{CapabilityRequest, CapabilityResponse, ResponseStream};
use weft_workflow::Trigger;

use crate::engine::Shared;
use crate::error::{EngineError, ErrorKind};

/// A trigger response, tagged with the trigger that emitted it.
#[derive(Debug)]
pub(crate) struct TriggerMessage {
  pub trigger_id: String,
  pub response: CapabilityResponse,
}

fn trigger_request(shared: &Shared, trigger: &Trigger) -> CapabilityRequest {
  let mut inputs = serde_json::Map::new();
  inputs.insert("triggerId".to_string(), json!(trigger.trigger_id));

  CapabilityRequest {
    metadata: shared.request_metadata(""),
    config: trigger.config.clone(),
    inputs,
  }
}

/// Register a trigger and start forwarding its events.
pub(crate) async fn register_trigger(
  shared: &Arc<Shared>,
  trigger: &Trigger,
) -> Result<(), EngineError> {
  let capability = trigger.capability().ok_or_else(|| {
    EngineError::new(ErrorKind::Trigger, "trigger capability not resolved")
      .workflow(&shared.workflow.id)
      .trigger(&trigger.trigger_id)
      .capability(&trigger.capability_id)
  })?;

  let stream = capability
    .register_trigger(trigger_request(shared, trigger))
    .await
    .map_err(|e| {
      EngineError::new(ErrorKind::Trigger, "failed to register trigger")
        .workflow(&shared.workflow.id)
        .trigger(&trigger.trigger_id)
        .capability(&trigger.capability_id)
        .with_source(e)
    })?;

  shared.tracker.spawn(forward(
    trigger.trigger_id.clone(),
    stream,
    shared.trigger_tx.clone(),
    shared.cancel.clone(),
  ));

  info!(
    trigger_id = %trigger.trigger_id,
    capability_id = %trigger.capability_id,
    "trigger registered"
  );
  Ok(())
}

/// Unregister a trigger. A trigger whose capability was never resolved is
/// left alone.
pub(crate) async fn unregister_trigger(
  shared: &Shared,
  trigger: &Trigger,
) -> Result<(), EngineError> {
  let Some(capability) = trigger.capability() else {
    return Ok(());
  };

  capability
    .unregister_trigger(trigger_request(shared, trigger))
    .await
    .map_err(|e| {
      EngineError::new(ErrorKind::Trigger, "failed to unregister trigger")
        .workflow(&shared.workflow.id)
        .trigger(&trigger.trigger_id)
        .capability(&trigger.capability_id)
        .with_source(e)
    })
}

async fn forward(
  trigger_id: String,
  mut stream: ResponseStream,
  sender: mpsc::Sender<TriggerMessage>,
  cancel: CancellationToken,
) {
  loop {
    let response = tokio::select! {
      _ = cancel.cancelled() => break,
      response = stream.recv() => match response {
        Some(response) => response,
        None => {
          debug!(trigger_id = %trigger_id, "trigger stream closed");
          break;
        }
      },
    };

    let message = TriggerMessage {
      trigger_id: trigger_id.clone(),
      response,
    };
    tokio::select! {
      _ = cancel.cancelled() => break,
      sent = sender.send(message) => {
        if sent.is_err() {
          break;
        }
      }
    }
  }
}
