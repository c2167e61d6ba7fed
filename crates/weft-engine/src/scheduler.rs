//! The scheduling loop and the execution completion policy.
//!
//! A single task owns every execution state transition. It starts once
//! initialization succeeded, first settles the executions left unfinished by
//! a previous run, then multiplexes three queues:
//!
//! - trigger messages, each starting a new execution
//! - step dispatches, each waiting for a worker permit
//! - step updates reported by workers, driving the completion policy
//!
//! Workers never touch execution state: they only send the record of the
//! step they ran.

use std::collections::BTreeSet;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use weft_capability::TriggerEvent;
use weft_store::{
  Error as StoreError, ExecutionStatus, StepOutput, StepStatus, WorkflowExecution,
  WorkflowExecutionStep,
};
use weft_workflow::TRIGGER_REF;

use crate::engine::Shared;
use crate::error::{EngineError, ErrorKind};
use crate::events::EngineEvent;
use crate::trigger::TriggerMessage;
use crate::worker;

/// A step ready to run, with the state of its execution when it was queued.
#[derive(Debug, Clone)]
pub(crate) struct StepRequest {
  pub step_ref: String,
  pub execution: WorkflowExecution,
}

/// Execution ids are derived from the workflow id and the trigger event id,
/// so a redelivered event maps to the execution it already created.
pub fn execution_id(workflow_id: &str, event_id: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(workflow_id.as_bytes());
  hasher.update(event_id.as_bytes());
  format!("{:x}", hasher.finalize())
}

pub(crate) struct Scheduler {
  shared: Arc<Shared>,
  dispatch: mpsc::Receiver<StepRequest>,
  updates: mpsc::Receiver<WorkflowExecutionStep>,
  triggers: mpsc::Receiver<TriggerMessage>,
}

impl Scheduler {
  pub fn new(
    shared: Arc<Shared>,
    dispatch: mpsc::Receiver<StepRequest>,
    updates: mpsc::Receiver<WorkflowExecutionStep>,
    triggers: mpsc::Receiver<TriggerMessage>,
  ) -> Self {
    Self {
      shared,
      dispatch,
      updates,
      triggers,
    }
  }

  pub async fn run(mut self, unfinished: Vec<WorkflowExecution>) {
    let cancel = self.shared.cancel.clone();

    for execution in &unfinished {
      if cancel.is_cancelled() {
        return;
      }
      self.shared.resume_execution(execution).await;
    }

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          debug!("scheduler stopped");
          return;
        }
        Some(message) = self.triggers.recv() => self.shared.start_execution(message).await,
        Some(request) = self.dispatch.recv() => self.dispatch(request).await,
        Some(update) = self.updates.recv() => self.shared.handle_step_update(update).await,
      }
    }
  }

  /// Hand a step to a worker, or put it back at the end of the queue if no
  /// worker frees up in time.
  async fn dispatch(&self, request: StepRequest) {
    let shared = &self.shared;
    let timeout = shared.settings.new_worker_timeout();

    let permit = tokio::select! {
      _ = shared.cancel.cancelled() => return,
      permit = tokio::time::timeout(timeout, shared.workers.clone().acquire_owned()) => permit,
    };

    match permit {
      Ok(Ok(permit)) => {
        shared
          .tracker
          .spawn(worker::run_step(shared.clone(), request, permit));
      }
      Ok(Err(_)) => {
        error!("worker pool closed, dropping step {}", request.step_ref);
      }
      Err(_) => {
        warn!(
          execution_id = %request.execution.execution_id,
          step_ref = %request.step_ref,
          timeout_ms = timeout.as_millis() as u64,
          "no worker available, requeueing step"
        );
        shared.enqueue(request);
      }
    }
  }
}

impl Shared {
  /// Queue a step for dispatch without blocking the loop.
  fn enqueue(&self, request: StepRequest) {
    if let Err(e) = self.dispatch_tx.try_send(request) {
      match e {
        mpsc::error::TrySendError::Full(request) => error!(
          execution_id = %request.execution.execution_id,
          step_ref = %request.step_ref,
          queue_size = self.settings.queue_size,
          "dispatch queue full, dropping step; increase queue_size"
        ),
        mpsc::error::TrySendError::Closed(_) => debug!("dispatch queue closed"),
      }
    }
  }

  /// Create an execution for a trigger event and queue its first steps.
  #[instrument(skip_all, fields(trigger_id = %message.trigger_id))]
  async fn start_execution(&self, message: TriggerMessage) {
    let value = match message.response {
      Ok(value) => value,
      Err(e) => {
        error!(error = %e, "trigger emitted an error");
        return;
      }
    };

    let event: TriggerEvent = match serde_json::from_value(value) {
      Ok(event) => event,
      Err(e) => {
        error!(error = %e, "trigger emitted an invalid event");
        return;
      }
    };

    let execution_id = execution_id(&self.workflow.id, &event.event_id);
    let now = self.clock.now();

    let mut execution = WorkflowExecution::new(&execution_id, &self.workflow.id, now);
    execution.steps.insert(
      TRIGGER_REF.to_string(),
      WorkflowExecutionStep {
        execution_id: execution_id.clone(),
        step_ref: TRIGGER_REF.to_string(),
        status: StepStatus::Completed,
        inputs: None,
        outputs: StepOutput {
          value: Some(event.outputs),
          error: None,
        },
        updated_at: now,
      },
    );

    match self.store.add(&execution).await {
      Ok(()) => {}
      Err(StoreError::AlreadyExists(_)) => {
        warn!(
          execution_id = %execution_id,
          event_id = %event.event_id,
          "execution already exists, skipping redelivered event"
        );
        return;
      }
      Err(e) => {
        let e = EngineError::new(ErrorKind::Execution, "failed to create execution")
          .workflow(&self.workflow.id)
          .execution(&execution_id)
          .with_source(e);
        error!(error = %e, "execution not started");
        return;
      }
    }

    info!(execution_id = %execution_id, event_id = %event.event_id, "execution started");
    self.notifier.notify(EngineEvent::ExecutionStarted {
      workflow_id: self.workflow.id.clone(),
      execution_id: execution_id.clone(),
    });

    self.advance(&execution, TRIGGER_REF).await;
  }

  /// Record a step update and apply the completion policy.
  #[instrument(skip_all, fields(execution_id = %update.execution_id, step_ref = %update.step_ref))]
  async fn handle_step_update(&self, update: WorkflowExecutionStep) {
    let execution = match self.store.upsert_step(&update).await {
      Ok(execution) => execution,
      Err(e) => {
        error!(error = %e, "failed to record step");
        return;
      }
    };

    debug!(status = ?update.status, "step finished");
    self.notifier.notify(EngineEvent::StepFinished {
      execution_id: update.execution_id.clone(),
      step_ref: update.step_ref.clone(),
      status: update.status,
    });

    match update.status {
      StepStatus::Completed => self.advance(&execution, &update.step_ref).await,
      StepStatus::CompletedEarlyExit => {
        self
          .finalize(&execution, ExecutionStatus::CompletedEarlyExit)
          .await
      }
      StepStatus::Errored => self.finalize(&execution, ExecutionStatus::Errored).await,
    }
  }

  /// Settle an execution found unfinished at startup: finish it if a previous
  /// run recorded its outcome but crashed before finalizing, otherwise queue
  /// the steps that are ready.
  async fn resume_execution(&self, execution: &WorkflowExecution) {
    info!(execution_id = %execution.execution_id, "resuming execution");

    let outcome = execution.steps.values().find_map(|record| match record.status {
      StepStatus::Errored => Some(ExecutionStatus::Errored),
      StepStatus::CompletedEarlyExit => Some(ExecutionStatus::CompletedEarlyExit),
      StepStatus::Completed => None,
    });
    if let Some(status) = outcome {
      self.finalize(execution, status).await;
      return;
    }

    if self.is_timed_out(execution) {
      self.finalize(execution, ExecutionStatus::Timeout).await;
      return;
    }

    if self.is_complete(execution) {
      self.finalize(execution, ExecutionStatus::Completed).await;
      return;
    }

    let mut candidates = BTreeSet::new();
    for step_ref in execution.steps.keys() {
      let Ok(dependents) = self.workflow.dependents(step_ref) else {
        warn!(step_ref = %step_ref, "record of unknown step");
        continue;
      };
      candidates.extend(dependents.iter().map(String::as_str));
    }
    for step_ref in candidates {
      self.enqueue_if_ready(execution, step_ref);
    }
  }

  /// Called once `step_ref` completed: time out the execution, finish it,
  /// or queue the dependents that became ready.
  async fn advance(&self, execution: &WorkflowExecution, step_ref: &str) {
    if self.is_timed_out(execution) {
      self.finalize(execution, ExecutionStatus::Timeout).await;
      return;
    }

    let dependents = match self.workflow.dependents(step_ref) {
      Ok(dependents) => dependents,
      Err(e) => {
        error!(execution_id = %execution.execution_id, error = %e, "failed to get dependents");
        return;
      }
    };

    if dependents.is_empty() {
      if self.is_complete(execution) {
        self.finalize(execution, ExecutionStatus::Completed).await;
      }
      return;
    }

    if execution.status.is_terminal() {
      debug!(
        execution_id = %execution.execution_id,
        status = ?execution.status,
        "execution already finished, not queueing dependents"
      );
      return;
    }

    for dependent in dependents {
      self.enqueue_if_ready(execution, dependent);
    }
  }

  /// Whether the execution has been running longer than allowed.
  fn is_timed_out(&self, execution: &WorkflowExecution) -> bool {
    let elapsed = self.clock.now() - execution.created_at;
    let max = chrono::TimeDelta::from_std(self.settings.max_execution_duration())
      .unwrap_or(chrono::TimeDelta::MAX);
    if elapsed <= max {
      return false;
    }

    warn!(
      execution_id = %execution.execution_id,
      elapsed_ms = elapsed.num_milliseconds(),
      "execution exceeded its maximum duration"
    );
    true
  }

  /// Queue `step_ref` if it has not run yet and all its dependencies
  /// completed.
  fn enqueue_if_ready(&self, execution: &WorkflowExecution, step_ref: &str) {
    if execution.steps.contains_key(step_ref) {
      return;
    }

    let Ok(step) = self.workflow.vertex(step_ref) else {
      error!(step_ref = %step_ref, "unknown step");
      return;
    };

    let ready = step
      .dependencies
      .iter()
      .all(|dep| execution.step_status(dep) == Some(StepStatus::Completed));
    if !ready {
      return;
    }

    debug!(execution_id = %execution.execution_id, step_ref = %step_ref, "step ready");
    self.enqueue(StepRequest {
      step_ref: step_ref.to_string(),
      execution: execution.clone(),
    });
  }

  /// Whether every step of the workflow has a record.
  fn is_complete(&self, execution: &WorkflowExecution) -> bool {
    self
      .workflow
      .walk(|step| {
        if execution.steps.contains_key(&step.step_ref) {
          Ok(())
        } else {
          Err(())
        }
      })
      .is_ok()
  }

  /// Move the execution to a terminal status. Only the first finalization
  /// of an execution is applied and notified.
  async fn finalize(&self, execution: &WorkflowExecution, status: ExecutionStatus) {
    let execution_id = &execution.execution_id;
    match self
      .store
      .update_status(execution_id, status, self.clock.now())
      .await
    {
      Ok(true) => {
        info!(execution_id = %execution_id, status = ?status, "execution finished");
        self.notifier.notify(EngineEvent::ExecutionFinished {
          workflow_id: self.workflow.id.clone(),
          execution_id: execution_id.clone(),
          status,
        });
      }
      Ok(false) => {
        debug!(execution_id = %execution_id, status = ?status, "execution already finished");
      }
      Err(e) => {
        error!(execution_id = %execution_id, error = %e, "failed to finish execution");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_execution_id_is_deterministic() {
    let a = execution_id("wf-1", "event-1");
    assert_eq!(a, execution_id("wf-1", "event-1"));
    assert_eq!(a.len(), 64);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

    assert_ne!(a, execution_id("wf-1", "event-2"));
    assert_ne!(a, execution_id("wf-2", "event-1"));
  }

  #[test]
  fn test_execution_id_matches_sha256() {
    // sha256("abc")
    assert_eq!(
      execution_id("a", "bc"),
      "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
  }
}
