//! Initialization state machine.
//!
//! ```text
//! NotStarted -> ResolvingLocalNode -> ResolvingCapabilities { attempt }
//!                      ^                         |
//!                      +------ retry_interval ---+ (failed attempt)
//!
//! ResolvingCapabilities -> TriggersRegistered -> Running
//! any state -> Failed   (retries exhausted, or engine closed)
//! ```
//!
//! An attempt resolves the local node, binds every trigger capability and
//! then every step capability. Failures within an attempt are collected and
//! reported together; the whole attempt is retried. Once an attempt
//! succeeds, unfinished executions are loaded, the scheduling loop is started
//! with them and triggers are registered. A failed initialization never
//! starts the loop.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};
use weft_capability::{
  CallbackCapability, CapabilityType, LocalTargetCapability, RegisterToWorkflowRequest,
};
use weft_store::WorkflowExecution;
use weft_workflow::Step;

use crate::engine::Shared;
use crate::error::{EngineError, ErrorKind};
use crate::events::EngineEvent;
use crate::scheduler::Scheduler;
use crate::trigger;

/// Executions resumed at startup, at most.
const RESUME_LIMIT: usize = 1_000;

/// Where the engine is in its initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitState {
  NotStarted,
  ResolvingLocalNode,
  ResolvingCapabilities { attempt: u32 },
  TriggersRegistered,
  Running,
  /// Initialization gave up. Terminal.
  Failed,
}

#[instrument(skip_all, fields(workflow_id = %shared.workflow.id))]
pub(crate) async fn initialize(shared: Arc<Shared>, scheduler: Scheduler) {
  let mut attempt: u32 = 0;

  loop {
    attempt += 1;

    let result = tokio::select! {
      _ = shared.cancel.cancelled() => {
        debug!("engine closed during initialization");
        fail(&shared);
        return;
      }
      result = resolve(&shared, attempt) => result,
    };

    let Err(e) = result else { break };

    let retries = attempt - 1;
    if shared.settings.max_init_retries.is_some_and(|max| retries >= max) {
      error!(attempt, error = %e, "initialization failed, giving up");
      fail(&shared);
      return;
    }

    warn!(attempt, error = %e, "initialization attempt failed, retrying");
    tokio::select! {
      _ = shared.cancel.cancelled() => {
        debug!("engine closed during initialization");
        fail(&shared);
        return;
      }
      _ = shared.clock.sleep(shared.settings.retry_interval()) => {}
    }
  }

  debug!("capabilities resolved, loading unfinished executions");
  let unfinished = match load_unfinished(&shared).await {
    Ok(unfinished) => unfinished,
    Err(e) => {
      error!(error = %e, "failed to load unfinished executions");
      Vec::new()
    }
  };
  shared.tracker.spawn(scheduler.run(unfinished));

  for t in &shared.workflow.triggers {
    if let Err(e) = trigger::register_trigger(&shared, t).await {
      error!(error = %e, "trigger not registered");
    }
  }
  shared.init_state.send_replace(InitState::TriggersRegistered);

  shared.init_state.send_replace(InitState::Running);
  info!("engine initialized");
  shared.notifier.notify(EngineEvent::Initialized {
    workflow_id: shared.workflow.id.clone(),
    success: true,
  });
}

fn fail(shared: &Shared) {
  shared.init_state.send_replace(InitState::Failed);
  shared.notifier.notify(EngineEvent::Initialized {
    workflow_id: shared.workflow.id.clone(),
    success: false,
  });
}

/// One initialization attempt.
async fn resolve(shared: &Shared, attempt: u32) -> Result<(), EngineError> {
  shared
    .init_state
    .send_replace(InitState::ResolvingLocalNode);

  let node = shared
    .local_node_resolver
    .local_node()
    .await
    .map_err(|e| {
      EngineError::new(ErrorKind::Workflow, "failed to resolve local node")
        .workflow(&shared.workflow.id)
        .with_source(e)
    })?;
  if shared.local_node.set(node).is_err() {
    debug!("local node already resolved");
  }

  shared
    .init_state
    .send_replace(InitState::ResolvingCapabilities { attempt });

  let mut errors = Vec::new();

  for t in &shared.workflow.triggers {
    if t.capability().is_some() {
      continue;
    }
    match shared.registry.get_trigger(&t.capability_id).await {
      Ok(capability) => {
        t.bind(capability);
      }
      Err(e) => errors.push(
        EngineError::new(ErrorKind::Trigger, "failed to get trigger capability")
          .trigger(&t.trigger_id)
          .capability(&t.capability_id)
          .with_source(e),
      ),
    }
  }

  for step in shared.workflow.steps() {
    if let Err(e) = bind_step(shared, step).await {
      errors.push(e);
    }
  }

  if errors.is_empty() {
    return Ok(());
  }

  let reasons: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
  Err(
    EngineError::new(
      ErrorKind::Workflow,
      format!(
        "failed to resolve workflow capabilities: {}",
        reasons.join("; ")
      ),
    )
    .workflow(&shared.workflow.id),
  )
}

/// Fetch, wrap, register and bind the capability of one step.
async fn bind_step(shared: &Shared, step: &Step) -> Result<(), EngineError> {
  if step.capability().is_some() {
    return Ok(());
  }

  let capability_error = |reason: &str| {
    EngineError::new(ErrorKind::Capability, reason)
      .workflow(&shared.workflow.id)
      .capability(&step.capability_id)
      .step(&step.step_ref)
  };

  let fetched = match step.capability_type {
    CapabilityType::Action => shared.registry.get_action(&step.capability_id).await,
    CapabilityType::Consensus => shared.registry.get_consensus(&step.capability_id).await,
    CapabilityType::Target => shared.registry.get_target(&step.capability_id).await,
    CapabilityType::Trigger => {
      return Err(capability_error("a step cannot use a trigger capability"));
    }
  };
  let mut capability: Arc<dyn CallbackCapability> =
    fetched.map_err(|e| capability_error("failed to get capability").with_source(e))?;

  let info = capability.info().clone();
  if info.capability_type == CapabilityType::Target && info.is_local() {
    debug!(capability_id = %info.id, "wrapping local target in transmission protocol");
    let node = shared.local_node.get().cloned().unwrap_or_default();
    let clock = shared.clock.clone();
    capability = Arc::new(
      LocalTargetCapability::new(node, capability)
        .with_sleep(Arc::new(move |delay| clock.sleep(delay))),
    );
  }

  capability
    .register_to_workflow(RegisterToWorkflowRequest {
      metadata: shared.registration_metadata(),
      config: step.config.clone(),
    })
    .await
    .map_err(|e| capability_error("failed to register capability to workflow").with_source(e))?;

  step.bind(capability);
  Ok(())
}

/// Executions of this workflow left unfinished by a previous run.
async fn load_unfinished(shared: &Shared) -> Result<Vec<WorkflowExecution>, EngineError> {
  let executions = shared
    .store
    .get_unfinished(&shared.workflow.id, 0, RESUME_LIMIT)
    .await
    .map_err(|e| {
      EngineError::new(ErrorKind::Store, "failed to list unfinished executions")
        .workflow(&shared.workflow.id)
        .with_source(e)
    })?;

  // TODO: page through unfinished executions instead of capping at RESUME_LIMIT
  if executions.len() >= RESUME_LIMIT {
    warn!(
      count = executions.len(),
      "possible overflow while resuming executions"
    );
  }

  Ok(executions)
}
