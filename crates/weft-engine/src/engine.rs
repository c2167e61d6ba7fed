//! Engine lifecycle.
//!
//! An [`Engine`] runs one workflow. `start` spawns the initialization task,
//! which starts the scheduling loop once it succeeds. `close` unregisters
//! triggers, stops every task the engine spawned and releases the step
//! capabilities.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::{Semaphore, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, instrument};
use weft_capability::{
  CapabilityRegistry, Node, RegistrationMetadata, RequestMetadata, UnregisterFromWorkflowRequest,
};
use weft_store::{Store, WorkflowExecutionStep};
use weft_workflow::Workflow;

use crate::clock::Clock;
use crate::config::{EngineConfig, EngineSettings, LocalNodeResolver};
use crate::error::{EngineError, ErrorKind};
use crate::events::EngineNotifier;
use crate::init::{self, InitState};
use crate::scheduler::{Scheduler, StepRequest};
use crate::trigger::{self, TriggerMessage};

const NOT_STARTED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// State shared by the engine's tasks.
pub(crate) struct Shared {
  pub workflow: Workflow,
  pub settings: EngineSettings,
  pub registry: Arc<dyn CapabilityRegistry>,
  pub store: Arc<dyn Store>,
  pub local_node_resolver: Arc<dyn LocalNodeResolver>,
  pub notifier: Arc<dyn EngineNotifier>,
  pub clock: Arc<dyn Clock>,
  /// Set once the local node has been resolved.
  pub local_node: OnceLock<Node>,
  pub cancel: CancellationToken,
  pub tracker: TaskTracker,
  pub workers: Arc<Semaphore>,
  pub dispatch_tx: mpsc::Sender<StepRequest>,
  pub update_tx: mpsc::Sender<WorkflowExecutionStep>,
  pub trigger_tx: mpsc::Sender<TriggerMessage>,
  pub init_state: watch::Sender<InitState>,
}

impl Shared {
  /// Metadata attached to capability requests made for `execution_id`.
  pub fn request_metadata(&self, execution_id: &str) -> RequestMetadata {
    RequestMetadata {
      workflow_id: self.workflow.id.clone(),
      workflow_execution_id: execution_id.to_string(),
      workflow_owner: self.workflow.owner.clone(),
      workflow_name: self.workflow.name.clone(),
      workflow_don_id: self
        .local_node
        .get()
        .map(|node| node.workflow_don.id.clone())
        .unwrap_or_default(),
    }
  }

  pub fn registration_metadata(&self) -> RegistrationMetadata {
    RegistrationMetadata {
      workflow_id: self.workflow.id.clone(),
    }
  }
}

/// Executes one workflow.
pub struct Engine {
  shared: Arc<Shared>,
  /// Handed to the initialization task on start.
  scheduler: Mutex<Option<Scheduler>>,
  lifecycle: AtomicU8,
}

impl Engine {
  /// Validate the workflow definition and set up the engine.
  ///
  /// Nothing runs until [`Engine::start`] is called.
  pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
    let workflow = Workflow::new(
      config.workflow_id.clone(),
      config.workflow_owner,
      config.workflow_name,
      &config.definition,
    )
    .map_err(|e| {
      EngineError::new(ErrorKind::Workflow, "invalid workflow definition")
        .workflow(&config.workflow_id)
        .with_source(e)
    })?;

    let worker_limit = config.settings.max_worker_limit;
    if worker_limit == 0 || worker_limit > Semaphore::MAX_PERMITS {
      return Err(
        EngineError::new(
          ErrorKind::Workflow,
          format!(
            "max_worker_limit must be between 1 and {}, got {worker_limit}",
            Semaphore::MAX_PERMITS
          ),
        )
        .workflow(&config.workflow_id),
      );
    }

    let queue_size = config.settings.queue_size.max(1);
    let (dispatch_tx, dispatch) = mpsc::channel(queue_size);
    let (update_tx, updates) = mpsc::channel(queue_size);
    let (trigger_tx, triggers) = mpsc::channel(queue_size);
    let (init_state, _) = watch::channel(InitState::NotStarted);

    let shared = Shared {
      workflow,
      workers: Arc::new(Semaphore::new(worker_limit)),
      settings: config.settings,
      registry: config.registry,
      store: config.store,
      local_node_resolver: config.local_node,
      notifier: config.notifier,
      clock: config.clock,
      local_node: OnceLock::new(),
      cancel: CancellationToken::new(),
      tracker: TaskTracker::new(),
      dispatch_tx,
      update_tx,
      trigger_tx,
      init_state,
    };

    let shared = Arc::new(shared);
    let scheduler = Scheduler::new(shared.clone(), dispatch, updates, triggers);

    Ok(Self {
      shared,
      scheduler: Mutex::new(Some(scheduler)),
      lifecycle: AtomicU8::new(NOT_STARTED),
    })
  }

  /// The validated workflow this engine runs.
  pub fn workflow(&self) -> &Workflow {
    &self.shared.workflow
  }

  /// Observe the initialization state machine.
  pub fn init_state(&self) -> watch::Receiver<InitState> {
    self.shared.init_state.subscribe()
  }

  /// Start initialization. The scheduling loop starts once it succeeds.
  #[instrument(skip(self), fields(workflow_id = %self.shared.workflow.id))]
  pub fn start(&self) -> Result<(), EngineError> {
    if let Err(state) =
      self
        .lifecycle
        .compare_exchange(NOT_STARTED, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
    {
      let reason = match state {
        RUNNING => "engine already started",
        _ => "engine already stopped",
      };
      return Err(EngineError::lifecycle(reason).workflow(&self.shared.workflow.id));
    }

    let scheduler = self
      .scheduler
      .lock()
      .ok()
      .and_then(|mut scheduler| scheduler.take())
      .ok_or_else(|| {
        EngineError::lifecycle("engine already started").workflow(&self.shared.workflow.id)
      })?;

    self
      .shared
      .tracker
      .spawn(init::initialize(self.shared.clone(), scheduler));

    info!("engine started");
    Ok(())
  }

  /// Stop the engine.
  ///
  /// Triggers are unregistered first; a failure there aborts the shutdown
  /// and is returned. Then every task is stopped and awaited, and each step
  /// capability is unregistered from the workflow.
  #[instrument(skip(self), fields(workflow_id = %self.shared.workflow.id))]
  pub async fn close(&self) -> Result<(), EngineError> {
    if let Err(state) =
      self
        .lifecycle
        .compare_exchange(RUNNING, STOPPED, Ordering::SeqCst, Ordering::SeqCst)
    {
      let reason = match state {
        NOT_STARTED => "engine not started",
        _ => "engine already stopped",
      };
      return Err(EngineError::lifecycle(reason).workflow(&self.shared.workflow.id));
    }

    for t in &self.shared.workflow.triggers {
      trigger::unregister_trigger(&self.shared, t).await?;
    }

    self.shared.cancel.cancel();
    self.shared.tracker.close();
    self.shared.tracker.wait().await;

    for step in self.shared.workflow.steps() {
      let Some(capability) = step.capability() else {
        continue;
      };

      capability
        .unregister_from_workflow(UnregisterFromWorkflowRequest {
          metadata: self.shared.registration_metadata(),
          config: step.config.clone(),
        })
        .await
        .map_err(|e| {
          EngineError::new(
            ErrorKind::Capability,
            "failed to unregister capability from workflow",
          )
          .workflow(&self.shared.workflow.id)
          .capability(&step.capability_id)
          .step(&step.step_ref)
          .with_source(e)
        })?;
    }

    info!("engine closed");
    Ok(())
  }
}
