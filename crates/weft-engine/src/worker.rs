//! Step execution.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, instrument, warn};
use weft_capability::{CapabilityError, CapabilityRequest, execute_sync};
use weft_store::{StepOutput, StepStatus, WorkflowExecutionStep};

use crate::engine::Shared;
use crate::error::{EngineError, ErrorKind};
use crate::input::interpolate_inputs;
use crate::scheduler::StepRequest;

/// Run one step and report its record to the scheduling loop.
///
/// The worker permit is held until the record has been handed over.
#[instrument(
  skip_all,
  fields(execution_id = %request.execution.execution_id, step_ref = %request.step_ref)
)]
pub(crate) async fn run_step(
  shared: Arc<Shared>,
  request: StepRequest,
  _permit: OwnedSemaphorePermit,
) {
  let execution_id = request.execution.execution_id.clone();
  let step_ref = request.step_ref.clone();

  let (status, inputs, outputs) = match execute_step(&shared, &request).await {
    Ok(Executed { inputs, value }) => (
      StepStatus::Completed,
      Some(inputs),
      StepOutput {
        value: Some(value),
        error: None,
      },
    ),
    Err(StepFailure { inputs, error }) => match error {
      StepError::Capability(CapabilityError::Cancelled) if shared.cancel.is_cancelled() => {
        debug!("step cancelled by shutdown");
        return;
      }
      StepError::Capability(CapabilityError::StopExecution) => {
        debug!("step requested early exit");
        (StepStatus::CompletedEarlyExit, inputs, StepOutput::default())
      }
      StepError::Capability(e) => {
        warn!(error = %e, "step failed");
        (
          StepStatus::Errored,
          inputs,
          StepOutput {
            value: None,
            error: Some(e.to_string()),
          },
        )
      }
      StepError::Engine(e) => {
        warn!(error = %e, "step failed");
        (
          StepStatus::Errored,
          inputs,
          StepOutput {
            value: None,
            error: Some(e.to_string()),
          },
        )
      }
    },
  };

  let record = WorkflowExecutionStep {
    execution_id,
    step_ref,
    status,
    inputs,
    outputs,
    updated_at: shared.clock.now(),
  };

  tokio::select! {
    _ = shared.cancel.cancelled() => {
      debug!("engine shutting down, dropping step update");
    }
    sent = shared.update_tx.send(record) => {
      if sent.is_err() {
        debug!("scheduler gone, dropping step update");
      }
    }
  }
}

struct Executed {
  inputs: Value,
  value: Value,
}

enum StepError {
  Engine(EngineError),
  Capability(CapabilityError),
}

struct StepFailure {
  inputs: Option<Value>,
  error: StepError,
}

async fn execute_step(shared: &Shared, request: &StepRequest) -> Result<Executed, StepFailure> {
  let failure = |inputs: Option<Value>, error: StepError| StepFailure { inputs, error };
  let execution = &request.execution;

  let step = shared
    .workflow
    .vertex(&request.step_ref)
    .map_err(|e| {
      failure(
        None,
        StepError::Engine(
          EngineError::new(ErrorKind::Step, "step not found")
            .execution(&execution.execution_id)
            .step(&request.step_ref)
            .with_source(e),
        ),
      )
    })?;

  let inputs = interpolate_inputs(&step.step_ref, &step.inputs, execution)
    .map_err(|e| failure(None, StepError::Engine(e)))?;
  let inputs_value = Value::Object(inputs.clone());

  let capability = step.capability().ok_or_else(|| {
    failure(
      Some(inputs_value.clone()),
      StepError::Engine(
        EngineError::new(ErrorKind::StepExecution, "capability not resolved")
          .execution(&execution.execution_id)
          .step(&step.step_ref)
          .capability(&step.capability_id),
      ),
    )
  })?;

  let capability_request = CapabilityRequest {
    metadata: shared.request_metadata(&execution.execution_id),
    config: step.config.clone(),
    inputs,
  };

  let values = execute_sync(
    capability.as_ref(),
    capability_request,
    shared.cancel.clone(),
  )
  .await
  .map_err(|e| failure(Some(inputs_value.clone()), StepError::Capability(e)))?;

  Ok(Executed {
    inputs: inputs_value,
    value: unwrap_values(values),
  })
}

/// One value is returned as is, several as a list, none as null.
fn unwrap_values(mut values: Vec<Value>) -> Value {
  match values.len() {
    0 => Value::Null,
    1 => values.remove(0),
    _ => Value::Array(values),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_unwrap_values() {
    assert_eq!(unwrap_values(vec![]), Value::Null);
    assert_eq!(unwrap_values(vec![json!({"a": 1})]), json!({"a": 1}));
    assert_eq!(unwrap_values(vec![json!(1), json!(2)]), json!([1, 2]));
  }
}
