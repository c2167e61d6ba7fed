use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{Error, ExecutionStatus, Store, WorkflowExecution, WorkflowExecutionStep};

/// Store keeping executions in memory.
#[derive(Default)]
pub struct InMemoryStore {
  executions: Mutex<HashMap<String, WorkflowExecution>>,
}

impl InMemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Store for InMemoryStore {
  async fn add(&self, execution: &WorkflowExecution) -> Result<(), Error> {
    let mut executions = self.executions.lock().await;
    if executions.contains_key(&execution.execution_id) {
      return Err(Error::AlreadyExists(execution.execution_id.clone()));
    }
    executions.insert(execution.execution_id.clone(), execution.clone());
    Ok(())
  }

  async fn upsert_step(&self, step: &WorkflowExecutionStep) -> Result<WorkflowExecution, Error> {
    let mut executions = self.executions.lock().await;
    let execution = executions
      .get_mut(&step.execution_id)
      .ok_or_else(|| Error::NotFound(step.execution_id.clone()))?;

    execution.steps.insert(step.step_ref.clone(), step.clone());
    execution.updated_at = execution.updated_at.max(step.updated_at);
    Ok(execution.clone())
  }

  async fn update_status(
    &self,
    execution_id: &str,
    status: ExecutionStatus,
    at: DateTime<Utc>,
  ) -> Result<bool, Error> {
    let mut executions = self.executions.lock().await;
    let execution = executions
      .get_mut(execution_id)
      .ok_or_else(|| Error::NotFound(execution_id.to_string()))?;

    if execution.status.is_terminal() {
      return Ok(false);
    }

    execution.status = status;
    execution.updated_at = at;
    if status.is_terminal() {
      execution.finished_at = Some(at);
    }
    Ok(true)
  }

  async fn get(&self, execution_id: &str) -> Result<WorkflowExecution, Error> {
    let executions = self.executions.lock().await;
    executions
      .get(execution_id)
      .cloned()
      .ok_or_else(|| Error::NotFound(execution_id.to_string()))
  }

  async fn get_unfinished(
    &self,
    workflow_id: &str,
    offset: usize,
    limit: usize,
  ) -> Result<Vec<WorkflowExecution>, Error> {
    let executions = self.executions.lock().await;
    let mut unfinished: Vec<WorkflowExecution> = executions
      .values()
      .filter(|e| e.workflow_id == workflow_id && !e.status.is_terminal())
      .cloned()
      .collect();
    unfinished.sort_by(|a, b| {
      a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.execution_id.cmp(&b.execution_id))
    });

    Ok(unfinished.into_iter().skip(offset).take(limit).collect())
  }
}
